//! Scheduler configuration

use std::time::Duration;

use super::types::{Result, SchedulerError};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due time/custom tasks are looked for
    pub check_interval: Duration,
    /// How often in-flight executions are checked for deadlocks
    pub deadlock_check_interval: Duration,
    /// How often finished one-shot tasks are archived
    pub cleanup_interval: Duration,
    /// Maximum concurrent task executions (`None` = unlimited)
    pub max_concurrent: Option<usize>,
    /// Timeout for tasks that don't set their own
    pub default_timeout: Duration,
    /// Retry budget for tasks that don't set their own
    pub default_max_retries: u32,
    /// Pause between a failed attempt and the task becoming due again
    pub retry_delay: Duration,
    /// Run time after which an execution counts as stuck
    pub deadlock_threshold: Duration,
    /// Waits between cancelling a stuck execution and force-detaching it
    pub escalation_stages: Vec<Duration>,
    /// Upper bound for a single custom predicate evaluation
    pub predicate_timeout: Duration,
    /// Execution records kept per task
    pub history_limit: usize,
    /// Runs considered for the health score
    pub timeout_history_limit: usize,
    /// Archived one-shot tasks kept for statistics
    pub completed_history_limit: usize,
    /// How long `stop` waits for running executions to drain
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            deadlock_check_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            max_concurrent: Some(100),
            default_timeout: Duration::from_secs(300),
            default_max_retries: 3,
            retry_delay: Duration::from_secs(5),
            deadlock_threshold: Duration::from_secs(600),
            escalation_stages: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            predicate_timeout: Duration::from_secs(1),
            history_limit: 10,
            timeout_history_limit: 20,
            completed_history_limit: 100,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set check interval
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set deadlock check interval
    pub fn with_deadlock_check_interval(mut self, interval: Duration) -> Self {
        self.deadlock_check_interval = interval;
        self
    }

    /// Set cleanup interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set max concurrent executions (`None` disables the limit)
    pub fn with_max_concurrent(mut self, max: Option<usize>) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set default task timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set default retry budget
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set deadlock threshold
    pub fn with_deadlock_threshold(mut self, threshold: Duration) -> Self {
        self.deadlock_threshold = threshold;
        self
    }

    /// Set cancellation escalation stages
    pub fn with_escalation_stages(mut self, stages: Vec<Duration>) -> Self {
        self.escalation_stages = stages;
        self
    }

    /// Set predicate timeout
    pub fn with_predicate_timeout(mut self, timeout: Duration) -> Self {
        self.predicate_timeout = timeout;
        self
    }

    /// Set per-task execution history length
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set archived task list capacity
    pub fn with_completed_history_limit(mut self, limit: usize) -> Self {
        self.completed_history_limit = limit;
        self
    }

    /// Set shutdown drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Total time a stuck execution gets between the cancel signal and detachment
    #[must_use]
    pub fn escalation_budget(&self) -> Duration {
        self.escalation_stages.iter().sum()
    }

    /// Check the values the loops depend on
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("check_interval", self.check_interval),
            ("deadlock_check_interval", self.deadlock_check_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("default_timeout", self.default_timeout),
            ("predicate_timeout", self.predicate_timeout),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, d)| d.is_zero()) {
            return Err(SchedulerError::InvalidConfig(format!(
                "{} must be positive",
                field
            )));
        }
        if self.max_concurrent == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrent must be positive (use None to disable the limit)".to_string(),
            ));
        }
        if self.timeout_history_limit == 0 {
            return Err(SchedulerError::InvalidConfig(
                "timeout_history_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
