use parking_lot::RwLock;
use secrecy::SecretString;
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use super::{cli::CliConfig, timings::LifecycleTimings, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub gateway_url: String,
    pub gateway_token: Option<SecretString>,
    pub organization_id: String,
    pub log_level: LogLevel,
    pub store_file: Option<PathBuf>,
    pub timings: LifecycleTimings,
    pub pair_hint: Option<String>,
    pub auto_refresh: bool,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Async because the timings file is read with non-blocking IO.
    pub async fn init() {
        CliConfig::init();

        Self::load().await;
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    async fn load() {
        let cli = CliConfig::snapshot();

        let timings = match cli.config_file_location.as_deref() {
            Some(path) => LifecycleTimings::from_file(path)
                .await
                .unwrap_or_else(|e| panic!("failed to load timings from {:?}: {e}", path)),
            None => LifecycleTimings::default(),
        };

        // First init wins.
        let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(Self::compose(cli, timings))));
    }

    fn compose(cli: CliConfig, timings: LifecycleTimings) -> Config {
        Config {
            gateway_url: cli.gateway_url,
            gateway_token: cli.gateway_token,
            organization_id: cli.organization_id,
            log_level: cli.log_level,
            store_file: cli.store_file_location,
            timings,
            pair_hint: cli.pair_hint,
            auto_refresh: cli.auto_refresh,
        }
    }

    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn compose_carries_cli_and_timings() {
        let cli = CliConfig {
            gateway_url: "https://gw.example".to_string(),
            gateway_token: None,
            organization_id: "org-1".to_string(),
            config_file_location: None,
            store_file_location: Some(PathBuf::from("/tmp/sessions.json")),
            log_level: LogLevel::Debug,
            pair_hint: None,
            auto_refresh: false,
        };
        let timings = LifecycleTimings {
            poll_interval: Duration::from_secs(3),
            ..LifecycleTimings::default()
        };

        let config = Config::compose(cli, timings);
        assert_eq!(config.organization_id, "org-1");
        assert_eq!(config.store_file, Some(PathBuf::from("/tmp/sessions.json")));
        assert_eq!(config.timings.poll_interval, Duration::from_secs(3));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.auto_refresh);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
