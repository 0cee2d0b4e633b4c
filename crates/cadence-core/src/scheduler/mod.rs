//! Unified task scheduler
//!
//! Runs callbacks when their trigger says so, for every subsystem that needs
//! work done later, repeatedly, or in reaction to something:
//!
//! - **Time triggers**: an absolute instant (optionally repeating) or a delay
//! - **Event triggers**: named events delivered via `on_event` or the event bus
//! - **Custom triggers**: caller supplied predicates polled every check tick
//!
//! Every execution runs as its own tokio task behind a global concurrency
//! gate, with a timeout, a retry budget and a deadlock detector that
//! escalates cancellation of executions that never finish.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ SchedulerEngine │  check / deadlock / cleanup loops, management API
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    TaskStore    │  live tasks, name + subscription indexes, archive
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Executor     │  gate → callback under timeout → outcome → retry
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │DeadlockDetector │  in-flight table, staged cancellation, health score
//! └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cadence_core::scheduler::{
//!     callback_fn, ScheduleRequest, SchedulerConfig, SchedulerEngine, TriggerConfig,
//! };
//!
//! let engine = SchedulerEngine::new(SchedulerConfig::new())?;
//! engine.start().await?;
//!
//! let heartbeat = callback_fn(|ctx| async move {
//!     tracing::info!(task = %ctx.task_name, "beat");
//!     Ok(serde_json::Value::Null)
//! });
//! engine.create_schedule(
//!     ScheduleRequest::new(heartbeat, TriggerConfig::delay(Duration::from_secs(30)))
//!         .recurring(true)
//!         .with_name("heartbeat"),
//! )?;
//!
//! engine.stop().await;
//! ```

mod callback;
mod config;
mod deadlock;
mod engine;
mod execution;
mod gate;
mod stats;
mod store;
mod task;
mod triggers;
mod types;

pub use callback::{
    callback_fn, predicate_async, predicate_fn, FnCallback, TaskCallback, TaskContext,
    TriggerPredicate,
};
pub use config::SchedulerConfig;
pub use engine::{SchedulerEngine, SchedulerEngineBuilder};
pub use stats::{RunningTaskSummary, SchedulerStats};
pub use task::{ScheduleRequest, TaskInfo};
pub use triggers::{CustomTrigger, EventTrigger, TimeSchedule, TimeTrigger, TriggerConfig};
pub use types::{
    ExecutionStatus, Result as SchedulerResult, SchedulerError, TaskExecution, TaskStatus,
    TriggerKind,
};

#[cfg(test)]
pub(crate) use callback::MockTaskCallback;
