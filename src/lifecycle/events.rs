use tokio::sync::broadcast;

use crate::shared_types::{SessionKey, SessionRecord};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const EVENT_CAPACITY: usize = 1024;

// -----------------------------------------------------------------------------
// ----- LifecycleEvent --------------------------------------------------------

/// What the lifecycle core tells its consumers (UI surfaces, notifiers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A record was accepted into the registry.
    StatusChanged(SessionRecord),

    /// The accepted record carries a pairing payload different from before.
    PairingImageUpdated {
        session: SessionRecord,
        image: String,
    },

    Connected(SessionRecord),

    Expired(SessionRecord),

    /// Connected, but not confirmed by the gateway for too long.
    Stale(SessionRecord),

    Removed(SessionKey),

    /// The gateway is pairing this session but issued no payload yet.
    PairingCodeUnavailable(SessionKey),
}

impl LifecycleEvent {
    pub fn session_key(&self) -> SessionKey {
        match self {
            LifecycleEvent::StatusChanged(r)
            | LifecycleEvent::Connected(r)
            | LifecycleEvent::Expired(r)
            | LifecycleEvent::Stale(r)
            | LifecycleEvent::PairingImageUpdated { session: r, .. } => r.key(),
            LifecycleEvent::Removed(key) | LifecycleEvent::PairingCodeUnavailable(key) => {
                key.clone()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::StatusChanged(_) => "status_changed",
            LifecycleEvent::PairingImageUpdated { .. } => "pairing_image_updated",
            LifecycleEvent::Connected(_) => "connected",
            LifecycleEvent::Expired(_) => "expired",
            LifecycleEvent::Stale(_) => "stale",
            LifecycleEvent::Removed(_) => "removed",
            LifecycleEvent::PairingCodeUnavailable(_) => "pairing_code_unavailable",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- EventBus --------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        // Nobody listening is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
