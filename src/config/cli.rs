use clap::Parser;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub gateway_url: String,
    pub gateway_token: Option<SecretString>,
    pub organization_id: String,
    pub config_file_location: Option<PathBuf>,
    pub store_file_location: Option<PathBuf>,
    pub log_level: LogLevel,
    pub pair_hint: Option<String>,
    pub auto_refresh: bool,
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let args = Args::try_parse().unwrap_or_else(|e| panic!("Invalid CLI/ENV: {e}"));
            let cfg = Self::from_args(args);
            cfg.validate();
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_args(args: Args) -> Self {
        Self {
            gateway_url: args.gateway_url,
            gateway_token: args
                .gateway_token
                .map(|token| SecretString::new(token.into_boxed_str())),
            organization_id: args.organization_id,
            config_file_location: args.config_file,
            store_file_location: args.store_file,
            log_level: args.log_level,
            pair_hint: args.pair,
            auto_refresh: !args.no_auto_refresh,
        }
    }

    fn validate(&self) {
        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            panic!(
                "--gateway-url must be an http(s) URL, got {:?}",
                self.gateway_url
            );
        }

        if self.organization_id.trim().is_empty() {
            panic!("--org / PAIRKEEPER_ORG must not be empty");
        }

        if let Some(path) = self.config_file_location.as_deref() {
            must_exist_file(path, "--config / PAIRKEEPER_CONFIG_FILE");
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pairkeeper",
    version,
    about = "Messaging gateway session lifecycle daemon"
)]
struct Args {
    // Base URL of the messaging gateway. Required via CLI or ENV.
    #[arg(long = "gateway-url", env = "PAIRKEEPER_GATEWAY_URL")]
    gateway_url: String,

    // Bearer token for the gateway, if it wants one.
    #[arg(
        long = "gateway-token",
        env = "PAIRKEEPER_GATEWAY_TOKEN",
        hide_env_values = true
    )]
    gateway_token: Option<String>,

    // Tenant whose sessions this process manages. Required via CLI or ENV.
    #[arg(long = "org", env = "PAIRKEEPER_ORG")]
    organization_id: String,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    // Optional TOML file with a [lifecycle] table; must exist when given.
    #[arg(long = "config", env = "PAIRKEEPER_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    // JSON snapshot of the session table. In-memory only when absent.
    #[arg(long = "store", env = "PAIRKEEPER_STORE_FILE")]
    store_file: Option<PathBuf>,

    // Start a pairing at boot, optionally with a disambiguating hint.
    #[arg(long = "pair", num_args = 0..=1, default_missing_value = "")]
    pair: Option<String>,

    #[arg(long = "no-auto-refresh")]
    no_auto_refresh: bool,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("config not initialized; call Config::init().await first")
        .clone()
}

fn must_exist_file(path: &Path, hint: &str) {
    let md = fs::metadata(path).unwrap_or_else(|_| {
        panic!("required file missing: {} (from {hint})", path.display());
    });

    if !md.is_file() {
        panic!("path is not a file: {} (from {hint})", path.display());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
