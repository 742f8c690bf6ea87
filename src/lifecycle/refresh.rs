use std::sync::Arc;
use tokio::{
    select,
    sync::Semaphore,
    task::JoinSet,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, warn};

use super::core::LifecycleCore;
use super::lease::{TimerKind, TimerLease};
use crate::shared_types::SessionRecord;

// -----------------------------------------------------------------------------
// ----- RefreshReport ---------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
}

// -----------------------------------------------------------------------------
// ----- RefreshScheduler ------------------------------------------------------

/// Periodic, silent `status(force)` sweep over every session of the tenant.
pub struct RefreshScheduler;

impl RefreshScheduler {
    pub(crate) fn spawn(core: Arc<LifecycleCore>) -> TimerLease {
        TimerLease::spawn(TimerKind::AutoRefresh, move |token| async move {
            let period = core.timings.refresh_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if core.registry.count(&core.organization_id) == 0 {
                    continue;
                }

                let report = Self::sweep(&core).await;
                debug!(
                    "auto-refresh for {}: {} refreshed, {} failed",
                    core.organization_id, report.refreshed, report.failed
                );
            }
        })
    }

    /// One pass over all known sessions. At most `refresh_concurrency`
    /// gateway calls are in flight; one failing session never stops the rest.
    pub(crate) async fn sweep(core: &Arc<LifecycleCore>) -> RefreshReport {
        let sessions = core.registry.list(&core.organization_id);
        let limit = Arc::new(Semaphore::new(core.timings.refresh_concurrency));
        let mut tasks = JoinSet::new();

        for observed in sessions {
            let core = Arc::clone(core);
            let limit = Arc::clone(&limit);

            tasks.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return false;
                };
                Self::refresh_one(&core, &observed).await
            });
        }

        let mut report = RefreshReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.refreshed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!("refresh task died: {e}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn refresh_one(core: &LifecycleCore, observed: &SessionRecord) -> bool {
        let key = observed.key();

        let reply = match core.status(&observed.session_name, true).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("refresh of {key} failed: {e}");
                return false;
            }
        };

        match core.apply_status(observed, reply, None).await {
            Ok(()) => true,
            Err(e) => {
                warn!("refresh of {key} could not be stored: {e}");
                false
            }
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
