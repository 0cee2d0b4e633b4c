//! Scheduler task types and error definitions
//!
//! Contains the status enums, execution records and errors shared by the
//! scheduler modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Scheduler error types
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler has not been started (or was stopped)
    #[error("scheduler is not running")]
    NotRunning,
    /// `start` was called on a running scheduler
    #[error("scheduler is already running")]
    AlreadyRunning,
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    /// Another active task already uses this name
    #[error("an active task named '{name}' already exists ({existing})")]
    NameConflict {
        /// Conflicting name
        name: String,
        /// Id of the task currently holding the name
        existing: Uuid,
    },
    /// The task is executing and the operation has to wait for it to finish
    #[error("task {0} is running")]
    TaskRunning(Uuid),
    /// The task is not in a state that allows the operation
    #[error("cannot {operation} task {id} while it is {status}")]
    InvalidState {
        /// Task id
        id: Uuid,
        /// Current status
        status: TaskStatus,
        /// Rejected operation
        operation: &'static str,
    },
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Lifecycle state of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its trigger
    Pending,
    /// An execution is in flight
    Running,
    /// One-shot task finished successfully
    Completed,
    /// Last execution failed
    Failed,
    /// Execution was cancelled
    Cancelled,
    /// Held back from triggering until resumed
    Paused,
    /// Last execution exceeded its timeout
    TimedOut,
}

impl TaskStatus {
    /// All statuses, in display order.
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Paused,
        TaskStatus::TimedOut,
    ];

    /// Whether the task holds its name exclusively.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether a one-shot task in this state is finished for good.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Stable lowercase label, used for stats keys and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Absolute time or relative delay
    Time,
    /// Named external event
    Event,
    /// Caller supplied predicate
    Custom,
}

impl TriggerKind {
    /// All kinds.
    pub const ALL: [TriggerKind; 3] = [TriggerKind::Time, TriggerKind::Event, TriggerKind::Custom];

    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Event => "event",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Callback returned `Ok`
    Succeeded,
    /// Callback returned an error or panicked
    Failed,
    /// Callback exceeded the task timeout
    TimedOut,
    /// Execution was cancelled or force-detached
    Cancelled,
}

/// Task execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Execution ID
    pub id: Uuid,
    /// Task ID
    pub task_id: Uuid,
    /// Retry attempt number (1 for the first try)
    pub attempt: u32,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Execution status
    pub status: ExecutionStatus,
    /// Error message for failed, timed out and cancelled runs
    pub error: Option<String>,
    /// Value returned by the callback
    pub result: Option<Value>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}
