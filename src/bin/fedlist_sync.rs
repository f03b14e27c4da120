//! Polls the registry and keeps an in-memory federation list until interrupted.
//!
//! Configuration comes from `VZD_*` environment variables; log output is
//! controlled with `RUST_LOG` (for example `RUST_LOG=federation_sync=debug`).

use federation_sync::{InMemoryListStore, SyncConfig, SyncOrchestrator};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SyncConfig::from_env()?;
    log::info!(
        "Starting federation list sync: registry={}, schedule={}, revocation={}",
        config.registry.service_url,
        config.schedule,
        config.revocation.enabled
    );

    let store = Arc::new(InMemoryListStore::new());
    let orchestrator = SyncOrchestrator::from_config(&config, store)?;
    let handle = orchestrator.spawn();

    tokio::signal::ctrl_c().await?;
    log::info!("Interrupted; stopping");

    handle.shutdown_configured().await?;
    if let Some(list) = orchestrator.current() {
        log::info!("Last stored federation list: {list}");
    }
    Ok(())
}
