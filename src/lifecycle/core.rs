use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::events::{EventBus, LifecycleEvent};
use super::flows::{PairingBook, PairingState};
use crate::config::LifecycleTimings;
use crate::errors::{GatewayError, StoreError};
use crate::gateway::{self, SessionGateway, StatusReply};
use crate::registry::{SessionRegistry, UpsertOutcome};
use crate::shared_types::{SessionKey, SessionRecord, SessionStatus};
use crate::store::SessionStore;

// -----------------------------------------------------------------------------
// ----- LifecycleCore ---------------------------------------------------------

/// Everything one tenant's flows, schedulers and reconciler share. The
/// registry is the only mutable state they touch, and only through its
/// methods.
pub(crate) struct LifecycleCore {
    pub(crate) organization_id: String,
    pub(crate) gateway: Arc<dyn SessionGateway>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) registry: SessionRegistry,
    pub(crate) flows: PairingBook,
    pub(crate) events: EventBus,
    pub(crate) timings: LifecycleTimings,
}

// -----------------------------------------------------------------------------
// ----- LifecycleCore: Static -------------------------------------------------

impl LifecycleCore {
    pub(crate) fn new(
        organization_id: String,
        gateway: Arc<dyn SessionGateway>,
        store: Arc<dyn SessionStore>,
        timings: LifecycleTimings,
    ) -> Self {
        let events = EventBus::new();

        Self {
            organization_id,
            gateway,
            store,
            registry: SessionRegistry::new(events.clone()),
            flows: PairingBook::new(),
            events,
            timings,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- LifecycleCore: Internal -----------------------------------------------

impl LifecycleCore {
    pub(crate) fn key(&self, session_name: &str) -> SessionKey {
        SessionKey::new(&self.organization_id, session_name)
    }

    pub(crate) async fn status(
        &self,
        session_name: &str,
        force: bool,
    ) -> Result<StatusReply, GatewayError> {
        gateway::within(
            self.timings.gateway_timeout,
            self.gateway.status(session_name, force),
        )
        .await
    }

    /// Registry first, then the store. A store write that fails is retried
    /// once; a second failure flags the session stale and is returned.
    pub(crate) async fn persist(&self, record: SessionRecord) -> Result<UpsertOutcome, StoreError> {
        let key = record.key();
        let outcome = self.registry.upsert(record.clone());

        if !outcome.is_applied() {
            debug!("not persisting {key}: registry answered {outcome:?}");
            return Ok(outcome);
        }

        let Err(first) = self.store.upsert(&record).await else {
            return Ok(outcome);
        };

        // A newer revision landed meanwhile; its own write carries the row.
        if let Some(current) = self.registry.get(&key) {
            if current.updated_at > record.updated_at {
                debug!("store write for {key} failed but was superseded: {first}");
                return Ok(UpsertOutcome::Discarded);
            }
        }

        warn!("store write for {key} failed, retrying once: {first}");

        match self.store.upsert(&record).await {
            Ok(()) => Ok(outcome),
            Err(second) => {
                error!("store write for {key} failed again: {second}");
                if let Some(flagged) = self.registry.flag_stale(&key) {
                    self.events.publish(LifecycleEvent::Stale(flagged));
                }
                Err(second)
            }
        }
    }

    /// Fold one successful status reply into the registry.
    ///
    /// `observed` is the record as it was when the call went out; if a newer
    /// local truth landed meanwhile, the reply is dropped. `epoch` ties the
    /// reply to one pairing flow; `None` means a bulk refresh.
    pub(crate) async fn apply_status(
        &self,
        observed: &SessionRecord,
        reply: StatusReply,
        epoch: Option<u64>,
    ) -> Result<(), StoreError> {
        let key = observed.key();

        let Some(current) = self.registry.get(&key) else {
            debug!("status for {key} arrived after it was removed");
            return Ok(());
        };

        self.registry.mark_synced(&key, Instant::now());

        if current.updated_at > observed.updated_at {
            debug!("status for {key} superseded by a newer local write");
            return Ok(());
        }

        let awaiting = self.flows.awaiting_epoch(&key);
        if epoch.is_some() && awaiting != epoch {
            debug!("status for {key} belongs to a finished pairing flow");
            return Ok(());
        }

        match (reply.status, reply.pairing_image) {
            (SessionStatus::Connected, _) => self.finish_connected(&current).await,

            (SessionStatus::Pairing, Some(image)) if awaiting.is_some() => {
                if current.pairing_image.as_deref() == Some(image.as_str()) {
                    return Ok(());
                }
                debug!("new pairing code for {key}");
                self.persist(current.to_pairing(image)).await.map(|_| ())
            }

            // Still waiting on a payload or on the scan; keep polling.
            (_, _) if awaiting.is_some() => Ok(()),

            // Pairing payloads only mean something inside a running flow.
            (_, _) => {
                if current.status == SessionStatus::Disconnected {
                    return Ok(());
                }
                info!("session {key} reported {} by gateway", reply.status);
                self.persist(current.to_disconnected()).await.map(|_| ())
            }
        }
    }

    /// Mark connected, ending any pairing flow. `Connected` fires only when
    /// a flow that was awaiting a scan is the one being completed.
    pub(crate) async fn finish_connected(&self, current: &SessionRecord) -> Result<(), StoreError> {
        let key = current.key();
        let completed_flow = self.flows.mark_connected(&key);

        let (record, written) = if current.status == SessionStatus::Connected {
            (current.clone(), Ok(()))
        } else {
            let record = current.to_connected();
            let written = self.persist(record.clone()).await.map(|_| ());
            (record, written)
        };

        if completed_flow {
            info!("session {key} paired and connected");
            self.events.publish(LifecycleEvent::Connected(record));
        }

        written
    }

    /// Countdown ran out: rest the session as disconnected and tell consumers.
    pub(crate) async fn expire(&self, key: &SessionKey) {
        let Some(current) = self.registry.get(key) else {
            return;
        };

        info!("pairing code for {key} expired");

        let record = if current.status == SessionStatus::Disconnected {
            current
        } else {
            let record = current.to_disconnected();
            if let Err(e) = self.persist(record.clone()).await {
                warn!("could not persist expiry of {key}: {e}");
            }
            record
        };

        self.events.publish(LifecycleEvent::Expired(record));
    }

    /// A pairing row with nobody counting it down: rest it as disconnected.
    pub(crate) async fn abandon_pairing(&self, key: &SessionKey) {
        let Some(current) = self.registry.get(key) else {
            return;
        };

        if current.status != SessionStatus::Pairing || self.flows.awaiting_epoch(key).is_some() {
            return;
        }

        info!("pairing for {key} has no running flow; marking disconnected");
        if let Err(e) = self.persist(current.to_disconnected()).await {
            warn!("could not persist abandoned pairing of {key}: {e}");
        }
    }

    /// The session is gone from the store: stop its timers for good.
    pub(crate) fn forget(&self, key: &SessionKey) {
        let previous = self.flows.settle(key, PairingState::Removed);
        if matches!(previous, PairingState::AwaitingScan { .. }) {
            info!("pairing for {key} stopped: session removed");
        }

        self.registry.remove(key);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::StartReply;
    use crate::store::{ChangeFeed, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl SessionGateway for Unreachable {
        async fn start(&self, _hint: &str) -> Result<StartReply, GatewayError> {
            Err(GatewayError::unavailable("offline"))
        }

        async fn status(&self, _name: &str, _force: bool) -> Result<StatusReply, GatewayError> {
            Err(GatewayError::unavailable("offline"))
        }

        async fn disconnect(&self, _name: &str) -> Result<(), GatewayError> {
            Err(GatewayError::unavailable("offline"))
        }
    }

    /// First write stalls for a second and then fails; later writes succeed.
    #[derive(Default)]
    struct SlowFirstWrite {
        rows: MemoryStore,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for SlowFirstWrite {
        async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                return Err(StoreError::write_failed("stalled"));
            }
            self.rows.upsert(record).await
        }

        async fn delete(&self, org: &str, name: &str) -> Result<(), StoreError> {
            self.rows.delete(org, name).await
        }

        async fn list(&self, org: &str) -> Result<Vec<SessionRecord>, StoreError> {
            self.rows.list(org).await
        }

        fn subscribe(&self, org: &str) -> ChangeFeed {
            self.rows.subscribe(org)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_not_retried_over_a_newer_revision() {
        let store = Arc::new(SlowFirstWrite::default());
        let core = Arc::new(LifecycleCore::new(
            "org-1".to_string(),
            Arc::new(Unreachable),
            store.clone(),
            LifecycleTimings::default(),
        ));

        let older = SessionRecord::new(&core.key("s1")).to_connected();
        let newer = older.to_disconnected();

        let writer = {
            let core = Arc::clone(&core);
            let older = older.clone();
            tokio::spawn(async move { core.persist(older).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        core.persist(newer.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let outcome = writer.await.unwrap().unwrap();
        assert_eq!(outcome, UpsertOutcome::Discarded);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.rows.get("org-1", "s1"), Some(newer.clone()));
        assert_eq!(core.registry.get(&core.key("s1")), Some(newer));
        assert!(!core.registry.is_stale(&core.key("s1")));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
