//! Background task startup functions

use std::time::Duration;

use cadence_core::{SchedulerEngine, ShutdownController};
use tokio::task::JoinHandle;
use tracing::info;

/// Log a scheduler status line every `interval`
pub fn start_status_task(
    engine: &SchedulerEngine,
    interval: Duration,
    shutdown_controller: &ShutdownController,
) -> JoinHandle<()> {
    let engine = engine.clone();
    let shutdown = shutdown_controller.token();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let stats = engine.statistics();
                    info!(
                        tasks = stats.total_tasks,
                        running = stats.running_tasks.len(),
                        executions = stats.total_executions,
                        failures = stats.total_failures,
                        timeouts = stats.total_timeouts,
                        success_rate = stats.success_rate,
                        available_slots = ?stats.available_slots,
                        archived = stats.archived_count,
                        "Scheduler status"
                    );
                }
                _ = shutdown.cancelled() => {
                    info!("Status task shutting down");
                    break;
                }
            }
        }
    });
    info!("Status task started ({}s interval)", interval.as_secs());
    handle
}
