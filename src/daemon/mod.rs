//! Scheduler daemon
//!
//! Wires configuration, the event bus and the scheduler engine together:
//! configured jobs are registered at startup, stdin lines become bus events,
//! and a signal (or the end of stdin) triggers a bounded shutdown.

use std::path::Path;

use anyhow::{Context, Result};
use cadence_core::{wait_for_shutdown_signal, EventBus, SchedulerEngine, ShutdownController};
use tracing::info;

mod background;
pub mod config;
mod ingress;
mod jobs;
mod loader;

pub use self::config::AppConfig;
pub use loader::load_config;

/// Start the daemon and run until a shutdown signal or end of input
pub async fn run(config_path: Option<&Path>, read_stdin: bool) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Invalid configuration")?;

    let bus = EventBus::new(config.event_bus.capacity);
    let engine = SchedulerEngine::builder()
        .config(config.scheduler.to_scheduler_config())
        .event_bus(bus.clone())
        .build()
        .context("Failed to build scheduler")?;
    engine.start().await.context("Failed to start scheduler")?;

    let registered = jobs::register_jobs(&engine, &config.jobs)?;
    info!(jobs = registered, "Cadence scheduler ready");

    let shutdown_controller = ShutdownController::new();
    let status_task = config
        .scheduler
        .status_interval()
        .map(|interval| background::start_status_task(&engine, interval, &shutdown_controller));

    let input = if read_stdin {
        Some(ingress::spawn_stdin_reader()?)
    } else {
        None
    };
    let ingress_token = shutdown_controller.token();
    let ingress = async {
        match input {
            Some(lines) => {
                ingress::forward_events(lines, &bus, ingress_token).await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = ingress => {}
    }

    shutdown_controller.shutdown().await;
    if let Some(handle) = status_task {
        let _ = handle.await;
    }
    engine.stop().await;

    let stats = engine.statistics();
    info!(
        executions = stats.total_executions,
        successes = stats.total_successes,
        failures = stats.total_failures,
        timeouts = stats.total_timeouts,
        cancellations = stats.total_cancellations,
        "Cadence scheduler stopped"
    );
    Ok(())
}

/// Check the configuration and print the job table
pub fn validate(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Invalid configuration")?;
    for job in &config.jobs {
        jobs::build_request(job)?;
    }

    println!("Configuration OK ({} jobs)", config.jobs.len());
    if !config.jobs.is_empty() {
        println!();
        println!("{:<24} {:<10} {:<40} ACTION", "NAME", "RECURRING", "TRIGGER");
        for job in &config.jobs {
            println!(
                "{:<24} {:<10} {:<40} {}",
                job.name,
                if job.recurring { "yes" } else { "no" },
                job.trigger.to_string(),
                job.action
            );
        }
    }
    Ok(())
}
