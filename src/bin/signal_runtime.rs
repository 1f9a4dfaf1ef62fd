//! Signal Runtime
//!
//! Runs the signal engine against a normalized block feed:
//! - Initializes SQLite database with schema
//! - Loads the entity catalogue and keeps it refreshed
//! - Reads newline-delimited JSON blocks from stdin (the upstream feed)
//! - Drives the pipeline coordinator until CTRL+C or end of input
//!
//! Usage:
//!   block-feed | cargo run --release --bin signal_runtime
//!
//! Environment variables: see `PipelineConfig::from_env`.

use chainpulse::entity::{
    spawn_refresh_task, EntityResolver, EntitySource, JsonFileEntitySource, SqliteEntitySource,
};
use chainpulse::insight::HttpNarrator;
use chainpulse::pipeline::{
    start_block_ingestion, PipelineConfig, PipelineCoordinator, SignalStore, SqliteSignalStore,
};
use chainpulse::types::Block;
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const NARRATOR_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Parse stdin lines into blocks until EOF or the receiver goes away
async fn read_blocks(tx: mpsc::Sender<Block>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("📭 End of block feed after {} lines", line_no);
                break;
            }
            Err(e) => {
                error!("❌ Failed to read block feed: {}", e);
                break;
            }
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Block>(&line) {
            Ok(block) => {
                if tx.send(block).await.is_err() {
                    warn!("⚠️  Block channel closed, stopping feed reader");
                    break;
                }
            }
            Err(e) => warn!("⚠️  Skipping malformed block on line {}: {}", line_no, e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::init();

    info!("🚀 Signal Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env();

    if !config.enabled {
        info!("⚠️  Pipeline is DISABLED (set ENABLE_PIPELINE=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    info!("✅ Pipeline ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Channel buffer: {} blocks", config.channel_buffer);
    info!("   ├─ Anomaly rule: mean + {}σ", config.anomaly_multiplier);
    info!("   ├─ Publish threshold: {}", config.publish_threshold);
    info!("   └─ Reorg depth trigger: > {} blocks", config.reorg_depth_trigger);

    // Initialize database (migrations are idempotent)
    info!("🔧 Initializing database...");
    let store: Arc<dyn SignalStore> =
        Arc::new(SqliteSignalStore::open_with_schema(&config.db_path, &config.schema_dir)?);
    info!("✅ Database initialized");

    // Entity catalogue
    let source: Arc<dyn EntitySource> = match &config.entity_source_json {
        Some(path) => Arc::new(JsonFileEntitySource::new(path)),
        None => Arc::new(SqliteEntitySource::new(&config.db_path)?),
    };
    let resolver = Arc::new(EntityResolver::new(source));
    if let Err(e) = resolver.refresh().await {
        warn!("⚠️  Starting with an empty entity snapshot: {}", e);
    }
    let refresh_handle = spawn_refresh_task(Arc::clone(&resolver), config.entity_refresh_interval());

    // Coordinator
    let mut coordinator = PipelineCoordinator::new(&config, resolver, store);
    if let Some(url) = &config.narrator_url {
        coordinator = coordinator.with_narrator(Arc::new(HttpNarrator::new(url.clone(), NARRATOR_TIMEOUT)?));
        info!("✅ Narrator: {}", url);
    }

    // Block feed → channel → coordinator
    let (tx, rx) = mpsc::channel::<Block>(config.channel_buffer);
    let feed_handle = tokio::spawn(read_blocks(tx));
    let mut ingestion_handle = tokio::spawn(start_block_ingestion(
        rx,
        coordinator,
        RETRY_INTERVAL,
        config.channel_buffer,
    ));
    info!("✅ Ingestion task spawned, reading blocks from stdin");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            // Stop the reader; ingestion finishes the block in hand and exits
            feed_handle.abort();
            match tokio::time::timeout(Duration::from_secs(10), &mut ingestion_handle).await {
                Ok(Ok((stats, _))) => info!("📊 Final: {:?}", stats),
                Ok(Err(e)) => error!("❌ Ingestion task failed: {}", e),
                Err(_) => warn!("⚠️  Ingestion did not stop within 10s"),
            }
        }
        joined = &mut ingestion_handle => {
            match joined {
                Ok((stats, _)) => info!("📊 Final: {:?}", stats),
                Err(e) => error!("❌ Ingestion task failed: {}", e),
            }
        }
    }

    refresh_handle.abort();
    info!("✅ Signal runtime stopped");
    Ok(())
}
