pub(crate) mod core;
pub mod events;
pub mod flows;
pub mod lease;
pub mod pairing;
pub mod reconciler;
pub mod refresh;
pub mod stale;

pub use events::{EventBus, LifecycleEvent};
pub use flows::{DrainedFlows, PairingBook, PairingState};
pub use lease::{TimerKind, TimerLease};
pub use pairing::PairingTicket;
pub use reconciler::RealtimeReconciler;
pub use refresh::{RefreshReport, RefreshScheduler};
pub use stale::StaleDataMonitor;
