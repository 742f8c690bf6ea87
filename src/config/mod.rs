pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod timings;
pub mod types;

pub use config::Config;
pub use timings::{LifecycleTimings, TimingsError};
pub use types::LogLevel;
