//! Block ingestion - async channel driver for the coordinator

use super::coordinator::PipelineCoordinator;
use crate::types::Block;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Totals reported when ingestion stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub blocks_received: u64,
    pub signals_written: u64,
    pub insights_published: u64,
    pub blocks_abandoned: u64,
}

/// Drive the coordinator from a block channel
///
/// Main loop:
/// 1. Receives normalized blocks from the upstream feed via mpsc channel
/// 2. Triggers the coordinator once per block
/// 3. Periodically retries deferred/abandoned blocks and logs throughput
///
/// Runs until the channel is closed (feed shutdown), then returns the totals
/// along with the coordinator so callers can inspect its final state.
pub async fn start_block_ingestion(
    mut rx: mpsc::Receiver<Block>,
    mut coordinator: PipelineCoordinator,
    retry_interval: Duration,
    channel_capacity: usize,
) -> (IngestionStats, PipelineCoordinator) {
    log::info!("🚀 Starting block ingestion");
    log::info!("   ├─ Retry interval: {}ms", retry_interval.as_millis());
    log::info!("   └─ Waiting for blocks...");

    let mut retry_timer = interval(retry_interval);
    retry_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = IngestionStats::default();
    let mut window_blocks = 0u64;
    let mut last_log_time = std::time::Instant::now();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(block) = received else {
                    break;
                };

                let outcome = coordinator.on_block(block).await;
                stats.blocks_received += 1;
                stats.signals_written += outcome.signals_written() as u64;
                stats.insights_published += outcome.insights_published() as u64;
                stats.blocks_abandoned += outcome.abandoned.len() as u64;
                window_blocks += 1;

                // Log throughput every 60 seconds
                if last_log_time.elapsed().as_secs() >= 60 {
                    let per_min = window_blocks as f64 * 60.0 / last_log_time.elapsed().as_secs_f64();
                    log::info!(
                        "📊 Ingestion rate: {:.1} blocks/min (total: {}, signals: {}, insights: {})",
                        per_min,
                        stats.blocks_received,
                        stats.signals_written,
                        stats.insights_published
                    );
                    last_log_time = std::time::Instant::now();
                    window_blocks = 0;
                }

                // Warn if channel is filling up (> 50% capacity)
                let channel_usage = rx.len();
                if channel_usage > channel_capacity / 2 {
                    log::warn!(
                        "⚠️  Channel usage high: {}/{} ({}%)",
                        channel_usage,
                        channel_capacity,
                        channel_usage * 100 / channel_capacity.max(1)
                    );
                }
            }

            _ = retry_timer.tick() => {
                if coordinator.pending_heights().is_empty() {
                    continue;
                }
                let outcome = coordinator.retry_pending().await;
                stats.signals_written += outcome.signals_written() as u64;
                stats.insights_published += outcome.insights_published() as u64;
                stats.blocks_abandoned += outcome.abandoned.len() as u64;
                if !outcome.deferred.is_empty() {
                    log::info!(
                        "⏳ {} block(s) still waiting: {:?} (state: {})",
                        outcome.deferred.len(),
                        outcome.deferred,
                        coordinator.state()
                    );
                }
            }
        }
    }

    log::info!(
        "🛑 Block channel closed: {} blocks, {} signals, {} insights, {} abandoned",
        stats.blocks_received,
        stats.signals_written,
        stats.insights_published,
        stats.blocks_abandoned
    );
    if !coordinator.replay_heights().is_empty() {
        log::warn!(
            "⚠️  Heights needing manual replay: {:?}",
            coordinator.replay_heights()
        );
    }

    (stats, coordinator)
}
