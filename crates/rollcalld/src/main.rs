use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod remote;
mod worker;

use config::Config;
use remote::OfflineRemote;
use rollcall_store::CacheStore;
use rollcall_sync::SyncEngine;
use worker::{spawn_worker, MatchParams};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        photos = %config.photo_dir.display(),
        "rollcalld starting"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.photo_dir)?;

    let store = Arc::new(CacheStore::open(&config.db_path)?);

    // TODO: replace OfflineRemote with the backend client once the
    // transport crate lands; until then everything queues locally.
    let engine = SyncEngine::new(store, OfflineRemote, config.start_online);
    let _worker = spawn_worker(
        engine,
        MatchParams {
            threshold: config.similarity_threshold,
            margin: config.match_margin,
        },
    );

    tracing::info!(
        threshold = config.similarity_threshold,
        margin = config.match_margin,
        min_passing_photos = config.min_passing_photos,
        retry_budget = config.retry_budget,
        "rollcalld ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
