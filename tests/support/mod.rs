#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::broadcast::{Receiver, error::TryRecvError};

use pairkeeper::{
    GatewayError, LifecycleEvent, LifecycleTimings, MemoryStore, SessionManager, SessionRecord,
    SessionStatus, SessionStore, StoreError,
    gateway::{SessionGateway, StartReply, StatusReply},
    store::ChangeFeed,
};

pub const ORG: &str = "org-1";

// -----------------------------------------------------------------------------
// ----- ScriptedGateway -------------------------------------------------------

/// Gateway double. `start` and `status` answer from per-session scripts:
/// queued one-shot replies first, then the standing reply, then
/// `Unavailable`.
#[derive(Default)]
pub struct ScriptedGateway {
    starts: Mutex<VecDeque<Result<StartReply, GatewayError>>>,
    queued: Mutex<HashMap<String, VecDeque<Result<StatusReply, GatewayError>>>>,
    standing: Mutex<HashMap<String, Result<StatusReply, GatewayError>>>,
    disconnects: Mutex<HashMap<String, GatewayError>>,
    status_calls: Mutex<HashMap<String, usize>>,
    status_delay: Mutex<Option<Duration>>,
    disconnect_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_start(&self, session_name: &str, status: SessionStatus, image: Option<&str>) {
        self.starts.lock().push_back(Ok(StartReply {
            session_name: session_name.to_string(),
            status,
            pairing_image: image.map(str::to_string),
        }));
    }

    pub fn fail_start(&self, err: GatewayError) {
        self.starts.lock().push_back(Err(err));
    }

    pub fn queue_status(&self, session_name: &str, reply: Result<StatusReply, GatewayError>) {
        self.queued
            .lock()
            .entry(session_name.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn set_status(&self, session_name: &str, reply: Result<StatusReply, GatewayError>) {
        self.standing.lock().insert(session_name.to_string(), reply);
    }

    pub fn fail_disconnect(&self, session_name: &str, err: GatewayError) {
        self.disconnects
            .lock()
            .insert(session_name.to_string(), err);
    }

    /// Make every `status` reply take `delay` of (paused) time.
    pub fn delay_status(&self, delay: Duration) {
        *self.status_delay.lock() = Some(delay);
    }

    pub fn status_calls(&self, session_name: &str) -> usize {
        self.status_calls
            .lock()
            .get(session_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionGateway for ScriptedGateway {
    async fn start(&self, _hint: &str) -> Result<StartReply, GatewayError> {
        self.starts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::rejected("unscripted start")))
    }

    async fn status(&self, session_name: &str, _force: bool) -> Result<StatusReply, GatewayError> {
        *self
            .status_calls
            .lock()
            .entry(session_name.to_string())
            .or_default() += 1;

        let delay = *self.status_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = self
            .queued
            .lock()
            .get_mut(session_name)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        self.standing
            .lock()
            .get(session_name)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::unavailable("unscripted status")))
    }

    async fn disconnect(&self, session_name: &str) -> Result<(), GatewayError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);

        match self.disconnects.lock().get(session_name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FlakyStore ------------------------------------------------------------

/// A [`MemoryStore`] whose next `n` upserts (or deletes) fail.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures_left: AtomicUsize,
    delete_failures_left: AtomicUsize,
    upsert_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures_left: AtomicUsize::new(0),
            delete_failures_left: AtomicUsize::new(0),
            upsert_attempts: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.delete_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.failures_left) {
            return Err(StoreError::write_failed("injected failure"));
        }

        self.inner.upsert(record).await
    }

    async fn delete(&self, organization_id: &str, session_name: &str) -> Result<(), StoreError> {
        if take_one(&self.delete_failures_left) {
            return Err(StoreError::write_failed("injected delete failure"));
        }

        self.inner.delete(organization_id, session_name).await
    }

    async fn list(&self, organization_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        self.inner.list(organization_id).await
    }

    fn subscribe(&self, organization_id: &str) -> ChangeFeed {
        self.inner.subscribe(organization_id)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

pub fn manager(gateway: Arc<ScriptedGateway>, store: Arc<dyn SessionStore>) -> SessionManager {
    manager_with(gateway, store, LifecycleTimings::default())
}

pub fn manager_with(
    gateway: Arc<ScriptedGateway>,
    store: Arc<dyn SessionStore>,
    timings: LifecycleTimings,
) -> SessionManager {
    SessionManager::new(ORG, gateway, store, timings)
}

/// Advance (paused) time by `secs` and let every woken task run.
pub async fn advance(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

/// Let spawned tasks catch up without crossing any timer boundary.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn drain(events: &mut Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
        }
    }
}

pub fn count(events: &[LifecycleEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// `pairing_image` is present exactly when the status is `pairing`.
pub fn assert_payload_invariant(manager: &SessionManager) {
    for record in manager.sessions() {
        assert_eq!(
            record.pairing_image.is_some(),
            record.status == SessionStatus::Pairing,
            "payload invariant broken for {}",
            record.session_name
        );
        assert!(record.is_consistent());
    }
}
