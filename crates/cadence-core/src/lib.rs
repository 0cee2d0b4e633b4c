//! Cadence Core - Unified Task Scheduling Engine
//!
//! This crate provides the in-process scheduler used by the Cadence daemon and
//! by any subsystem that needs work to happen later, repeatedly, or in reaction
//! to something:
//! - Scheduler: time, event and predicate triggered tasks with concurrency
//!   limits, timeouts, retries and deadlock recovery
//! - EventBus: broadcast bus that feeds named events into the scheduler
//! - Shutdown: coordinated, bounded shutdown of long-running components

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_bus;
pub mod scheduler;
pub mod shutdown;

pub use event_bus::{BusEvent, EventBus};

// Re-export shutdown module types
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, ShutdownPhase, TaskGuard};

// Re-export scheduler module types
pub use scheduler::{
    callback_fn, CustomTrigger, EventTrigger, ExecutionStatus, RunningTaskSummary,
    ScheduleRequest, SchedulerConfig, SchedulerEngine, SchedulerEngineBuilder, SchedulerError,
    SchedulerResult, SchedulerStats, TaskCallback, TaskContext, TaskExecution, TaskInfo,
    TaskStatus, TimeSchedule, TimeTrigger, TriggerConfig, TriggerKind, TriggerPredicate,
};
