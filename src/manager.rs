use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::{sync::broadcast, time::Instant};
use tracing::{info, warn};

use crate::config::LifecycleTimings;
use crate::errors::{LifecycleError, StoreError};
use crate::gateway::SessionGateway;
use crate::lifecycle::{
    LifecycleEvent, PairingState, PairingTicket, RealtimeReconciler, RefreshReport,
    RefreshScheduler, StaleDataMonitor, TimerLease, core::LifecycleCore,
};
use crate::shared_types::{SessionRecord, SessionStatus};
use crate::store::SessionStore;

// -----------------------------------------------------------------------------
// ----- SessionManager --------------------------------------------------------

/// One organization's session lifecycle: pairing flows, background refresh,
/// stale detection and store reconciliation behind a single handle.
///
/// Every surface (the daemon, a UI, a test) talks to the same core, so there
/// is exactly one registry and one set of timers per tenant.
pub struct SessionManager {
    core: Arc<LifecycleCore>,
    background: Mutex<Background>,
}

#[derive(Default)]
struct Background {
    started: bool,
    auto_refresh: bool,
    reconciler: Option<TimerLease>,
    stale: Option<TimerLease>,
    refresh: Option<TimerLease>,
}

impl Background {
    fn take_leases(&mut self) -> Vec<TimerLease> {
        [self.reconciler.take(), self.stale.take(), self.refresh.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

// -----------------------------------------------------------------------------
// ----- SessionManager: Static ------------------------------------------------

impl SessionManager {
    pub fn new(
        organization_id: impl Into<String>,
        gateway: Arc<dyn SessionGateway>,
        store: Arc<dyn SessionStore>,
        timings: LifecycleTimings,
    ) -> Self {
        let core = LifecycleCore::new(organization_id.into(), gateway, store, timings);

        Self {
            core: Arc::new(core),
            background: Mutex::new(Background::default()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SessionManager: Lifecycle ---------------------------------------------

impl SessionManager {
    /// Hydrate from the store and spawn the background tasks. Subscribes to
    /// the feed before listing so no change falls in between.
    pub async fn start(&self, auto_refresh: bool) -> Result<usize, StoreError> {
        if self.background.lock().started {
            return Ok(self.core.registry.count(&self.core.organization_id));
        }

        let org = self.core.organization_id.as_str();
        let feed = self.core.store.subscribe(org);
        let records = self.core.store.list(org).await?;
        let hydrated = records.len();

        // A pairing code left behind by an earlier run has no countdown here.
        let mut orphaned = Vec::new();
        for record in records {
            if record.status == SessionStatus::Pairing {
                orphaned.push(record.key());
            }
            self.core.registry.upsert(record);
        }
        for key in orphaned.iter() {
            self.core.abandon_pairing(key).await;
        }

        let mut background = self.background.lock();
        if background.started {
            return Ok(hydrated);
        }

        background.reconciler = Some(RealtimeReconciler::spawn(Arc::clone(&self.core), feed));
        background.stale = Some(StaleDataMonitor::spawn(Arc::clone(&self.core)));
        background.auto_refresh = auto_refresh;
        if auto_refresh {
            background.refresh = Some(RefreshScheduler::spawn(Arc::clone(&self.core)));
        }
        background.started = true;

        info!("session manager for {org} started with {hydrated} sessions");
        Ok(hydrated)
    }

    /// Release every lease and wait for the tasks behind them.
    pub async fn shutdown(&self) {
        let mut leases = {
            let mut background = self.background.lock();
            background.started = false;
            background.take_leases()
        };
        let drained = self.core.flows.drain();
        leases.extend(drained.leases);

        for lease in leases {
            lease.join().await;
        }

        for key in drained.interrupted.iter() {
            self.core.abandon_pairing(key).await;
        }

        info!(
            "session manager for {} stopped",
            self.core.organization_id
        );
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        let mut background = self.background.lock();
        background.auto_refresh = enabled;

        if !background.started {
            return;
        }

        match (enabled, background.refresh.is_some()) {
            (true, false) => {
                background.refresh = Some(RefreshScheduler::spawn(Arc::clone(&self.core)));
                info!("auto-refresh enabled for {}", self.core.organization_id);
            }
            (false, true) => {
                if let Some(lease) = background.refresh.take() {
                    lease.release();
                }
                info!("auto-refresh disabled for {}", self.core.organization_id);
            }
            _ => {}
        }
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.background.lock().auto_refresh
    }
}

// -----------------------------------------------------------------------------
// ----- SessionManager: Actions -----------------------------------------------

impl SessionManager {
    /// Start pairing a session. Without a hint one is generated for the
    /// organization; the gateway decides the final session name.
    pub async fn pair(&self, hint: Option<&str>) -> Result<PairingTicket, LifecycleError> {
        let hint = match hint.map(str::trim) {
            Some(hint) if !hint.is_empty() => hint.to_string(),
            _ => self.generated_hint(),
        };

        self.core.begin_pairing(&hint).await
    }

    pub async fn refresh_pairing_code(
        &self,
        session_name: &str,
    ) -> Result<PairingTicket, LifecycleError> {
        let key = self.core.key(session_name);
        self.core.refresh_pairing_code(&key).await
    }

    pub async fn cancel_pairing(&self, session_name: &str) -> Result<(), LifecycleError> {
        let key = self.core.key(session_name);
        self.core.cancel_pairing(&key).await
    }

    pub async fn disconnect(&self, session_name: &str) -> Result<(), LifecycleError> {
        let key = self.core.key(session_name);
        self.core.disconnect(&key).await
    }

    pub async fn delete(&self, session_name: &str) -> Result<(), LifecycleError> {
        let key = self.core.key(session_name);
        self.core.delete(&key).await
    }

    pub async fn refresh_all(&self) -> RefreshReport {
        let report = RefreshScheduler::sweep(&self.core).await;
        if report.failed > 0 {
            warn!(
                "refresh for {}: {} of {} sessions failed",
                self.core.organization_id,
                report.failed,
                report.refreshed + report.failed
            );
        }
        report
    }
}

// -----------------------------------------------------------------------------
// ----- SessionManager: Queries -----------------------------------------------

impl SessionManager {
    pub fn organization_id(&self) -> &str {
        &self.core.organization_id
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.core.registry.list(&self.core.organization_id)
    }

    pub fn session(&self, session_name: &str) -> Option<SessionRecord> {
        self.core.registry.get(&self.core.key(session_name))
    }

    pub fn last_sync_at(&self, session_name: &str) -> Option<Instant> {
        self.core.registry.last_sync_at(&self.core.key(session_name))
    }

    pub fn is_stale(&self, session_name: &str) -> bool {
        self.core.registry.is_stale(&self.core.key(session_name))
    }

    pub fn pairing_state(&self, session_name: &str) -> PairingState {
        self.core.flows.state(&self.core.key(session_name))
    }

    /// Seconds left on the pairing code, while one is on screen.
    pub fn countdown(&self, session_name: &str) -> Option<u32> {
        self.core.flows.countdown(&self.core.key(session_name))
    }

    /// Live pairing timers (poll and countdown) held for one session.
    pub fn active_timer_count(&self, session_name: &str) -> usize {
        self.core.flows.active_timers(&self.core.key(session_name))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.core.events.subscribe()
    }
}

// -----------------------------------------------------------------------------
// ----- SessionManager: Private -----------------------------------------------

impl SessionManager {
    fn generated_hint(&self) -> String {
        let suffix: u32 = rand::rng().random_range(0..0x100_0000);
        format!("{}-{suffix:06x}", self.core.organization_id)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
