use std::{io, sync::Arc};
use tokio::{signal, sync::broadcast::error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use pairkeeper::{
    Config, HttpGateway, JsonFileStore, LifecycleEvent, MemoryStore, SessionManager, SessionStore,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🔗 pairkeeper";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    setup().await;
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> io::Result<()> {
    let config = Config::snapshot();

    let gateway = HttpGateway::new(
        &config.gateway_url,
        config.gateway_token.clone(),
        config.timings.gateway_timeout,
    )
    .map_err(io::Error::other)?;

    let store: Arc<dyn SessionStore> = match config.store_file.as_deref() {
        Some(path) => Arc::new(JsonFileStore::open(path).await.map_err(io::Error::other)?),
        None => Arc::new(MemoryStore::new()),
    };

    let manager = SessionManager::new(
        config.organization_id.clone(),
        Arc::new(gateway),
        store,
        config.timings,
    );

    let logger = tokio::spawn(log_events(manager.subscribe()));

    let hydrated = manager
        .start(config.auto_refresh)
        .await
        .map_err(io::Error::other)?;

    info!(
        "{} managing {} sessions for {} via {}",
        APP_NAME, hydrated, config.organization_id, config.gateway_url
    );

    if let Some(hint) = config.pair_hint.as_deref() {
        match manager.pair(Some(hint)).await {
            Ok(ticket) => match ticket.require_image() {
                Ok(image) => info!(
                    "scan the pairing code for {} within {}s: {image}",
                    ticket.session,
                    ticket.countdown.unwrap_or_default()
                ),
                Err(_) if ticket.countdown.is_none() => info!("{} is ready", ticket.session),
                Err(e) => warn!("{e}"),
            },
            Err(e) => error!("pairing failed: {e}"),
        }
    }

    signal::ctrl_c().await?;
    info!("{} shutting down", APP_NAME);

    manager.shutdown().await;
    logger.abort();

    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => info!("{} {}", event.kind(), event.session_key()),
            Err(RecvError::Lagged(skipped)) => warn!("event log skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
