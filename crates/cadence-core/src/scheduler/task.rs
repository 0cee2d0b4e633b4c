//! Task records and their run-state transitions
//!
//! A [`ScheduledTask`] is owned by the task store; every transition
//! (`begin_run`, `finish_run`, retry handling) happens while the store holds
//! the entry, so a task can never have two executions in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::callback::TaskCallback;
use super::config::SchedulerConfig;
use super::triggers::TriggerConfig;
use super::types::{ExecutionStatus, TaskExecution, TaskStatus, TriggerKind};

/// Everything needed to register a task
#[derive(Clone)]
pub struct ScheduleRequest {
    pub(crate) callback: Arc<dyn TaskCallback>,
    pub(crate) trigger: TriggerConfig,
    pub(crate) recurring: bool,
    pub(crate) name: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) params: Map<String, Value>,
    pub(crate) force_overwrite: bool,
}

impl ScheduleRequest {
    /// Create a one-shot request
    pub fn new(callback: Arc<dyn TaskCallback>, trigger: TriggerConfig) -> Self {
        Self {
            callback,
            trigger,
            recurring: false,
            name: None,
            timeout: None,
            max_retries: None,
            params: Map::new(),
            force_overwrite: false,
        }
    }

    /// Make the task recurring
    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    /// Set task name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the default retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Bind parameters passed to every execution
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Bind a single parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Replace an active task with the same name instead of failing
    pub fn force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }
}

impl std::fmt::Debug for ScheduleRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleRequest")
            .field("trigger", &self.trigger)
            .field("recurring", &self.recurring)
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("force_overwrite", &self.force_overwrite)
            .finish_non_exhaustive()
    }
}

/// Scheduled task record
#[derive(Clone)]
pub struct ScheduledTask {
    /// Unique task ID
    pub id: Uuid,
    /// Human-readable task name
    pub name: String,
    /// Trigger configuration
    pub trigger: TriggerConfig,
    /// Whether the task returns to Pending after each run
    pub recurring: bool,
    /// Parameters bound at creation
    pub params: Map<String, Value>,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Per-execution timeout
    pub timeout: Duration,
    /// Retry budget per failure streak
    pub max_retries: u32,
    /// Retries used in the current failure streak
    pub retry_count: u32,
    /// Number of times the task was fired
    pub trigger_count: u64,
    /// Successful executions
    pub success_count: u64,
    /// Failed executions (errors and panics, not timeouts)
    pub failure_count: u64,
    /// Executions that exceeded the timeout
    pub timeout_count: u64,
    /// Cancelled or force-detached executions
    pub cancel_count: u64,
    /// Accumulated execution time
    pub total_execution_time: Duration,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last fire timestamp
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// When a pending retry makes the task due again
    pub retry_at: Option<DateTime<Utc>>,
    /// Message of the last failure
    pub last_error: Option<String>,
    /// In-flight execution, if any
    pub current_execution: Option<Uuid>,
    /// Recent executions, oldest first
    pub history: VecDeque<TaskExecution>,
    pub(crate) callback: Arc<dyn TaskCallback>,
    history_limit: usize,
}

/// What the run loop has to do after an execution finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishDecision {
    /// Task is back to Pending or terminal; nothing else to do
    Settled,
    /// Wait the retry delay, then re-arm
    Retry,
    /// The execution was detached or the task removed; result dropped
    Stale,
}

/// Result of one execution, as seen by the engine
#[derive(Debug, Clone)]
pub(crate) enum RunOutcome {
    Succeeded(Value),
    Failed(String),
    TimedOut(Duration),
    Cancelled(String),
}

impl RunOutcome {
    pub(crate) fn status(&self) -> ExecutionStatus {
        match self {
            Self::Succeeded(_) => ExecutionStatus::Succeeded,
            Self::Failed(_) => ExecutionStatus::Failed,
            Self::TimedOut(_) => ExecutionStatus::TimedOut,
            Self::Cancelled(_) => ExecutionStatus::Cancelled,
        }
    }
}

/// Snapshot handed to an execution when a task fires
#[derive(Clone)]
pub(crate) struct RunTicket {
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub name: String,
    pub attempt: u32,
    pub timeout: Duration,
    pub params: Map<String, Value>,
    pub callback: Arc<dyn TaskCallback>,
}

impl ScheduledTask {
    pub(crate) fn from_request(request: ScheduleRequest, config: &SchedulerConfig) -> Self {
        let id = Uuid::new_v4();
        let name = request
            .name
            .unwrap_or_else(|| format!("task-{}", &id.simple().to_string()[..8]));
        Self {
            id,
            name,
            trigger: request.trigger,
            recurring: request.recurring,
            params: request.params,
            status: TaskStatus::Pending,
            timeout: request.timeout.unwrap_or(config.default_timeout),
            max_retries: request.max_retries.unwrap_or(config.default_max_retries),
            retry_count: 0,
            trigger_count: 0,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            cancel_count: 0,
            total_execution_time: Duration::ZERO,
            created_at: Utc::now(),
            last_triggered_at: None,
            retry_at: None,
            last_error: None,
            current_execution: None,
            history: VecDeque::new(),
            callback: request.callback,
            history_limit: config.history_limit,
        }
    }

    /// Trigger kind
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        self.trigger.kind()
    }

    /// Next time-trigger fire, or the retry instant while a retry is pending
    #[must_use]
    pub fn next_trigger_at(&self) -> Option<DateTime<Utc>> {
        if self.retry_at.is_some() {
            return self.retry_at;
        }
        match &self.trigger {
            TriggerConfig::Time(time) => {
                time.next_fire(self.recurring, self.created_at, self.last_triggered_at)
            }
            _ => None,
        }
    }

    /// Whether a Pending time-triggered task is due at `now`
    #[must_use]
    pub fn is_time_due(&self, now: DateTime<Utc>) -> bool {
        match &self.trigger {
            TriggerConfig::Time(time) if self.status == TaskStatus::Pending => {
                time.is_due(self.recurring, self.created_at, self.last_triggered_at, now)
            }
            _ => false,
        }
    }

    /// Executions that reached an outcome
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.success_count + self.failure_count + self.timeout_count + self.cancel_count
    }

    /// Mean execution time over finished executions
    #[must_use]
    pub fn average_execution_time(&self) -> Duration {
        match u32::try_from(self.execution_count()) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_execution_time / n,
            Err(_) => Duration::from_secs_f64(
                self.total_execution_time.as_secs_f64() / self.execution_count() as f64,
            ),
        }
    }

    /// Whether the cleanup loop should archive this task
    #[must_use]
    pub fn is_archivable(&self) -> bool {
        !self.recurring
            && self.status.is_terminal()
            && self.retry_at.is_none()
            && self.current_execution.is_none()
    }

    /// Whether the task keeps its name reserved. A task waiting out its
    /// retry delay will become Pending again, so it still owns the name.
    #[must_use]
    pub fn holds_name(&self) -> bool {
        self.status.is_active() || self.retry_at.is_some()
    }

    /// Pending → Running. Event params are merged over the bound params.
    pub(crate) fn begin_run(
        &mut self,
        now: DateTime<Utc>,
        extra_params: &Map<String, Value>,
    ) -> RunTicket {
        let execution_id = Uuid::new_v4();
        self.status = TaskStatus::Running;
        self.trigger_count += 1;
        self.last_triggered_at = Some(now);
        self.current_execution = Some(execution_id);

        let mut params = self.params.clone();
        params.extend(extra_params.iter().map(|(k, v)| (k.clone(), v.clone())));

        RunTicket {
            task_id: self.id,
            execution_id,
            name: self.name.clone(),
            attempt: self.retry_count + 1,
            timeout: self.timeout,
            params,
            callback: self.callback.clone(),
        }
    }

    /// Record an outcome and move the state machine.
    pub(crate) fn finish_run(
        &mut self,
        execution_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
        duration: Duration,
        retry_delay: Duration,
    ) -> FinishDecision {
        if self.current_execution != Some(execution_id) {
            return FinishDecision::Stale;
        }
        self.current_execution = None;
        self.total_execution_time += duration;

        let status = outcome.status();
        let (error, result) = match &outcome {
            RunOutcome::Succeeded(value) => (None, Some(value.clone())),
            RunOutcome::Failed(msg) | RunOutcome::Cancelled(msg) => (Some(msg.clone()), None),
            RunOutcome::TimedOut(limit) => {
                (Some(format!("timed out after {}ms", limit.as_millis())), None)
            }
        };
        self.push_history(TaskExecution {
            id: execution_id,
            task_id: self.id,
            attempt: self.retry_count + 1,
            started_at,
            finished_at: Utc::now(),
            status,
            error: error.clone(),
            result,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });

        match outcome {
            RunOutcome::Succeeded(_) => {
                self.success_count += 1;
                self.retry_count = 0;
                self.last_error = None;
                self.status = if self.recurring {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Completed
                };
                FinishDecision::Settled
            }
            RunOutcome::Failed(_) => {
                self.failure_count += 1;
                self.last_error = error;
                self.after_failure(TaskStatus::Failed, retry_delay)
            }
            RunOutcome::TimedOut(_) => {
                self.timeout_count += 1;
                self.last_error = error;
                self.after_failure(TaskStatus::TimedOut, retry_delay)
            }
            RunOutcome::Cancelled(_) => {
                self.cancel_count += 1;
                self.last_error = error;
                self.retry_count = 0;
                self.status = if self.recurring {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Cancelled
                };
                FinishDecision::Settled
            }
        }
    }

    fn after_failure(&mut self, status: TaskStatus, retry_delay: Duration) -> FinishDecision {
        self.status = status;
        if self.retry_count < self.max_retries {
            self.retry_at = chrono::Duration::from_std(retry_delay)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d));
            return FinishDecision::Retry;
        }
        if self.recurring {
            // streak exhausted; fall back to the regular schedule
            self.retry_count = 0;
            self.status = TaskStatus::Pending;
        }
        FinishDecision::Settled
    }

    /// Failed/TimedOut → Pending after the retry delay.
    pub(crate) fn rearm_for_retry(&mut self) -> bool {
        let waiting = matches!(self.status, TaskStatus::Failed | TaskStatus::TimedOut)
            && self.retry_at.is_some();
        if !waiting {
            return false;
        }
        self.retry_at = None;
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        true
    }

    /// Drop a pending retry (cancelled while waiting).
    pub(crate) fn abandon_retry(&mut self) {
        if self.retry_at.take().is_none() {
            return;
        }
        if self.recurring {
            self.retry_count = 0;
            self.status = TaskStatus::Pending;
        }
    }

    fn push_history(&mut self, execution: TaskExecution) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(execution);
    }

    /// Diagnostic snapshot
    #[must_use]
    pub fn info(&self, health_score: f64) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            trigger_kind: self.kind(),
            recurring: self.recurring,
            status: self.status,
            created_at: self.created_at,
            last_triggered_at: self.last_triggered_at,
            next_trigger_at: self.next_trigger_at(),
            trigger_count: self.trigger_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            timeout_count: self.timeout_count,
            cancel_count: self.cancel_count,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            average_execution_secs: self.average_execution_time().as_secs_f64(),
            total_execution_secs: self.total_execution_time.as_secs_f64(),
            health_score,
            is_running: self.status == TaskStatus::Running,
            trigger_config: self.trigger.snapshot(),
            timeout_secs: self.timeout.as_secs_f64(),
            last_error: self.last_error.clone(),
            recent_executions: self.history.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("recurring", &self.recurring)
            .field("status", &self.status)
            .field("trigger_count", &self.trigger_count)
            .finish_non_exhaustive()
    }
}

/// Task diagnostics returned by `task_info` and `list_tasks`
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    /// Task ID
    pub id: Uuid,
    /// Task name
    pub name: String,
    /// Trigger kind
    pub trigger_kind: TriggerKind,
    /// Recurring flag
    pub recurring: bool,
    /// Current status
    pub status: TaskStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last fire timestamp
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Next planned fire (time triggers and pending retries only)
    pub next_trigger_at: Option<DateTime<Utc>>,
    /// Times fired
    pub trigger_count: u64,
    /// Successful executions
    pub success_count: u64,
    /// Failed executions
    pub failure_count: u64,
    /// Timed out executions
    pub timeout_count: u64,
    /// Cancelled executions
    pub cancel_count: u64,
    /// Retries used in the current failure streak
    pub retry_count: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Mean execution time in seconds
    pub average_execution_secs: f64,
    /// Total execution time in seconds
    pub total_execution_secs: f64,
    /// Fraction of recent runs that did not time out
    pub health_score: f64,
    /// Whether an execution is in flight
    pub is_running: bool,
    /// Trigger configuration snapshot
    pub trigger_config: Value,
    /// Timeout in seconds
    pub timeout_secs: f64,
    /// Last error message
    pub last_error: Option<String>,
    /// Recent execution records
    pub recent_executions: Vec<TaskExecution>,
}
