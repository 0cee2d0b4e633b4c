//! Scheduler statistics

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use uuid::Uuid;

use super::types::ExecutionStatus;

/// Aggregate scheduler statistics
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Whether the loops are running
    pub running: bool,
    /// Seconds since `start`, zero while stopped
    pub uptime_secs: f64,
    /// Live tasks
    pub total_tasks: usize,
    /// Live tasks per status
    pub by_status: HashMap<String, usize>,
    /// Live tasks per trigger kind
    pub by_kind: HashMap<String, usize>,
    /// Live recurring tasks
    pub recurring: usize,
    /// Live one-shot tasks
    pub one_shot: usize,
    /// Events with at least one subscriber
    pub subscribed_events: Vec<String>,
    /// Executions that reached an outcome
    pub total_executions: u64,
    /// Successful executions
    pub total_successes: u64,
    /// Failed executions
    pub total_failures: u64,
    /// Timed out executions
    pub total_timeouts: u64,
    /// Cancelled or force-detached executions
    pub total_cancellations: u64,
    /// `total_successes / total_executions`, 1.0 before the first execution
    pub success_rate: f64,
    /// Tasks in the recently-completed archive
    pub archived_count: usize,
    /// Executions currently holding a slot, longest running first
    pub running_tasks: Vec<RunningTaskSummary>,
    /// Concurrency limit (`None` = unlimited)
    pub max_concurrent: Option<usize>,
    /// Free concurrency slots (`None` = unlimited)
    pub available_slots: Option<usize>,
    /// Default timeout in seconds
    pub default_timeout_secs: f64,
    /// Default retry budget
    pub default_max_retries: u32,
    /// Retry delay in seconds
    pub retry_delay_secs: f64,
    /// Deadlock threshold in seconds
    pub deadlock_threshold_secs: f64,
}

/// One in-flight execution
#[derive(Debug, Clone, Serialize)]
pub struct RunningTaskSummary {
    /// Task ID
    pub id: Uuid,
    /// Task name
    pub name: String,
    /// Execution ID
    pub execution_id: Uuid,
    /// Seconds since the execution acquired its slot
    pub running_for_secs: f64,
}

/// Global outcome counters, independent of task lifetimes
#[derive(Debug, Default)]
pub(crate) struct ExecutionTotals {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TotalsSnapshot {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
}

impl TotalsSnapshot {
    pub(crate) fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            1.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}

impl ExecutionTotals {
    pub(crate) fn record(&self, status: ExecutionStatus) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            ExecutionStatus::Succeeded => &self.successes,
            ExecutionStatus::Failed => &self.failures,
            ExecutionStatus::TimedOut => &self.timeouts,
            ExecutionStatus::Cancelled => &self.cancellations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            executions: self.executions.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}
