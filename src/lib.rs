pub mod config;
pub mod errors;
pub mod gateway;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod shared_types;
pub mod store;

pub use config::{Config, LifecycleTimings};
pub use errors::{GatewayError, LifecycleError, StoreError};
pub use gateway::{HttpGateway, SessionGateway};
pub use lifecycle::{LifecycleEvent, PairingState, PairingTicket, RefreshReport};
pub use manager::SessionManager;
pub use shared_types::{SessionKey, SessionRecord, SessionStatus};
pub use store::{JsonFileStore, MemoryStore, SessionStore};
