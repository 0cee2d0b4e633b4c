//! Daemon configuration types
//!
//! Contains all configuration structures for the Cadence daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use cadence_core::SchedulerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerAppConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    /// Check the scheduler settings and every job, including name uniqueness
    pub fn validate(&self) -> Result<()> {
        self.scheduler.to_scheduler_config().validate()?;

        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !seen.insert(job.name.as_str()) {
                bail!("duplicate job name '{}'", job.name);
            }
        }
        Ok(())
    }
}

/// Scheduler configuration (exposed to TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerAppConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_deadlock_check_interval")]
    pub deadlock_check_interval_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Maximum concurrent executions (0 = unlimited)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_deadlock_threshold")]
    pub deadlock_threshold_secs: u64,
    #[serde(default = "default_escalation_stages")]
    pub escalation_stages_secs: Vec<u64>,
    #[serde(default = "default_predicate_timeout")]
    pub predicate_timeout_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_completed_history_limit")]
    pub completed_history_limit: usize,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// How often the daemon logs scheduler statistics (0 = never)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for SchedulerAppConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            deadlock_check_interval_secs: default_deadlock_check_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            max_concurrent: default_max_concurrent(),
            default_timeout_secs: default_timeout(),
            default_max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            deadlock_threshold_secs: default_deadlock_threshold(),
            escalation_stages_secs: default_escalation_stages(),
            predicate_timeout_secs: default_predicate_timeout(),
            history_limit: default_history_limit(),
            completed_history_limit: default_completed_history_limit(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl SchedulerAppConfig {
    /// Engine configuration for these settings
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_check_interval(Duration::from_secs(self.check_interval_secs))
            .with_deadlock_check_interval(Duration::from_secs(self.deadlock_check_interval_secs))
            .with_cleanup_interval(Duration::from_secs(self.cleanup_interval_secs))
            .with_max_concurrent((self.max_concurrent > 0).then_some(self.max_concurrent))
            .with_default_timeout(Duration::from_secs(self.default_timeout_secs))
            .with_default_max_retries(self.default_max_retries)
            .with_retry_delay(Duration::from_secs(self.retry_delay_secs))
            .with_deadlock_threshold(Duration::from_secs(self.deadlock_threshold_secs))
            .with_escalation_stages(
                self.escalation_stages_secs
                    .iter()
                    .map(|secs| Duration::from_secs(*secs))
                    .collect(),
            )
            .with_predicate_timeout(Duration::from_secs(self.predicate_timeout_secs))
            .with_history_limit(self.history_limit)
            .with_completed_history_limit(self.completed_history_limit)
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
    }

    /// Status report period, `None` when disabled
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

fn default_check_interval() -> u64 {
    1
}
fn default_deadlock_check_interval() -> u64 {
    30
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    100
}
fn default_timeout() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_deadlock_threshold() -> u64 {
    600
}
fn default_escalation_stages() -> Vec<u64> {
    vec![1, 3, 5, 10]
}
fn default_predicate_timeout() -> u64 {
    1
}
fn default_history_limit() -> usize {
    10
}
fn default_completed_history_limit() -> usize {
    100
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_status_interval() -> u64 {
    60
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

fn default_bus_capacity() -> usize {
    256
}

/// A task declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub trigger: JobTrigger,
    pub action: JobAction,
    #[serde(default)]
    pub recurring: bool,
    /// Overrides the scheduler's default timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Overrides the scheduler's default retry budget
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Bound parameters, overridden by event parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl JobConfig {
    /// Reject jobs the scheduler would refuse
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("job name must not be empty");
        }
        if self.timeout_secs == Some(0) {
            bail!("job '{}': timeout_secs must be positive", self.name);
        }
        match &self.trigger {
            JobTrigger::Delay { secs: 0 } if self.recurring => {
                bail!("job '{}': recurring delay must be positive", self.name)
            }
            JobTrigger::At { interval_secs: None, .. } if self.recurring => {
                bail!("job '{}': recurring 'at' trigger needs interval_secs", self.name)
            }
            JobTrigger::At { interval_secs: Some(0), .. } => {
                bail!("job '{}': interval_secs must be positive", self.name)
            }
            JobTrigger::Event { name } if name.trim().is_empty() => {
                bail!("job '{}': event name must not be empty", self.name)
            }
            _ => {}
        }
        if let JobAction::Shell { command } = &self.action {
            if command.trim().is_empty() {
                bail!("job '{}': shell command must not be empty", self.name);
            }
        }
        Ok(())
    }
}

/// When a job fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTrigger {
    /// `secs` after registration (and after each fire when recurring)
    Delay { secs: u64 },
    /// At an RFC 3339 instant, repeating every `interval_secs` when recurring
    At {
        at: DateTime<Utc>,
        #[serde(default)]
        interval_secs: Option<u64>,
    },
    /// Whenever the named event is published
    Event { name: String },
    /// As soon as `path` exists
    FileExists { path: PathBuf },
}

impl std::fmt::Display for JobTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delay { secs } => write!(f, "delay {}s", secs),
            Self::At {
                at,
                interval_secs: Some(interval),
            } => write!(f, "at {} every {}s", at.to_rfc3339(), interval),
            Self::At { at, .. } => write!(f, "at {}", at.to_rfc3339()),
            Self::Event { name } => write!(f, "event {}", name),
            Self::FileExists { path } => write!(f, "file {}", path.display()),
        }
    }
}

/// What a job does when it fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobAction {
    /// Write a log line
    Log { message: String },
    /// Run a command with `sh -c`
    Shell { command: String },
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log { message } => write!(f, "log: {}", message),
            Self::Shell { command } => write!(f, "shell: {}", command),
        }
    }
}
