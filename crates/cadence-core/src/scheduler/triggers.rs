//! Scheduler triggers - conditions that activate scheduled tasks
//!
//! Supports three trigger kinds:
//! - Time: an absolute instant (optionally repeating) or a relative delay
//! - Event: a named event delivered through `SchedulerEngine::on_event`
//! - Custom: a caller supplied predicate polled on every check tick

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::callback::{predicate_async, predicate_fn, TriggerPredicate};
use super::types::{Result, SchedulerError, TriggerKind};

/// Trigger configuration for a scheduled task
#[derive(Debug, Clone)]
pub enum TriggerConfig {
    /// Time based trigger
    Time(TimeTrigger),
    /// External event trigger
    Event(EventTrigger),
    /// Predicate trigger
    Custom(CustomTrigger),
}

impl TriggerConfig {
    /// Fire once at `at` (repeats every `interval` if the task is recurring,
    /// see [`TriggerConfig::every`]).
    pub fn at(at: DateTime<Utc>) -> Self {
        Self::Time(TimeTrigger {
            schedule: TimeSchedule::At { at, interval: None },
        })
    }

    /// First fire at `first`, then every `interval` after the previous fire.
    pub fn every(first: DateTime<Utc>, interval: Duration) -> Self {
        Self::Time(TimeTrigger {
            schedule: TimeSchedule::At {
                at: first,
                interval: Some(interval),
            },
        })
    }

    /// Fire `delay` after creation, and `delay` after each fire when recurring.
    pub fn delay(delay: Duration) -> Self {
        Self::Time(TimeTrigger {
            schedule: TimeSchedule::Delay { delay },
        })
    }

    /// Fire whenever the named event is delivered.
    pub fn event(event_name: impl Into<String>) -> Self {
        Self::Event(EventTrigger {
            event_name: event_name.into(),
        })
    }

    /// Fire when a synchronous predicate returns `Ok(true)`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Custom(CustomTrigger::new(predicate_fn(f)))
    }

    /// Fire when an async predicate resolves to `Ok(true)`.
    pub fn custom_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::Custom(CustomTrigger::new(predicate_async(f)))
    }

    /// Trigger kind
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Time(_) => TriggerKind::Time,
            Self::Event(_) => TriggerKind::Event,
            Self::Custom(_) => TriggerKind::Custom,
        }
    }

    /// Subscribed event name for event triggers
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event(event) => Some(&event.event_name),
            _ => None,
        }
    }

    /// JSON view of the configuration for diagnostics
    #[must_use]
    pub fn snapshot(&self) -> Value {
        match self {
            Self::Time(time) => match &time.schedule {
                TimeSchedule::At { at, interval } => json!({
                    "type": "time",
                    "at": at.to_rfc3339(),
                    "interval_secs": interval.map(|i| i.as_secs_f64()),
                }),
                TimeSchedule::Delay { delay } => json!({
                    "type": "time",
                    "delay_secs": delay.as_secs_f64(),
                }),
            },
            Self::Event(event) => json!({
                "type": "event",
                "event_name": event.event_name,
            }),
            Self::Custom(custom) => json!({
                "type": "custom",
                "description": custom.description,
            }),
        }
    }

    /// Reject configurations that could never fire or would fire in a tight loop.
    pub(crate) fn validate(&self, recurring: bool) -> Result<()> {
        match self {
            Self::Time(TimeTrigger {
                schedule: TimeSchedule::At { interval, .. },
            }) => match interval {
                None if recurring => Err(SchedulerError::InvalidConfig(
                    "recurring absolute-time trigger needs an interval".to_string(),
                )),
                Some(i) if i.is_zero() => Err(SchedulerError::InvalidConfig(
                    "trigger interval must be positive".to_string(),
                )),
                _ => Ok(()),
            },
            Self::Time(TimeTrigger {
                schedule: TimeSchedule::Delay { delay },
            }) if recurring && delay.is_zero() => Err(SchedulerError::InvalidConfig(
                "recurring delay trigger needs a positive delay".to_string(),
            )),
            Self::Event(event) if event.event_name.trim().is_empty() => Err(
                SchedulerError::InvalidConfig("event trigger needs an event name".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Time based trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTrigger {
    /// When to fire
    pub schedule: TimeSchedule,
}

/// Absolute or relative time schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSchedule {
    /// Absolute instant; recurring tasks re-arm `interval` after each fire
    At {
        /// First (or only) fire time
        at: DateTime<Utc>,
        /// Spacing between fires for recurring tasks
        interval: Option<Duration>,
    },
    /// Relative to creation (first fire) or to the previous fire
    Delay {
        /// Delay before firing
        delay: Duration,
    },
}

impl TimeTrigger {
    /// Next instant this trigger wants to fire, if any.
    ///
    /// Recurring spacing is measured from the actual previous fire, not from
    /// a grid anchored at `at`, so a late fire shifts every later one.
    #[must_use]
    pub fn next_fire(
        &self,
        recurring: bool,
        created_at: DateTime<Utc>,
        last_triggered_at: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self.schedule {
            TimeSchedule::At { at, interval } => match (last_triggered_at, recurring, interval) {
                (None, _, _) | (Some(_), false, _) => Some(at),
                (Some(last), true, Some(interval)) => add_std(last, interval),
                (Some(_), true, None) => None,
            },
            TimeSchedule::Delay { delay } => {
                add_std(last_triggered_at.unwrap_or(created_at), delay)
            }
        }
    }

    /// Whether the trigger is due at `now`.
    #[must_use]
    pub fn is_due(
        &self,
        recurring: bool,
        created_at: DateTime<Utc>,
        last_triggered_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        self.next_fire(recurring, created_at, last_triggered_at)
            .is_some_and(|next| now >= next)
    }
}

fn add_std(base: DateTime<Utc>, delta: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delta)
        .ok()
        .and_then(|delta| base.checked_add_signed(delta))
}

/// Event trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTrigger {
    /// Name of the event the task subscribes to
    pub event_name: String,
}

/// Predicate trigger
#[derive(Clone)]
pub struct CustomTrigger {
    /// Predicate polled every check tick
    pub predicate: Arc<dyn TriggerPredicate>,
    /// Human readable description shown in diagnostics
    pub description: Option<String>,
}

impl CustomTrigger {
    /// Create a custom trigger from a predicate
    pub fn new(predicate: Arc<dyn TriggerPredicate>) -> Self {
        Self {
            predicate,
            description: None,
        }
    }

    /// Set a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Evaluate the predicate, treating errors, panics and overruns as "no".
    pub(crate) async fn evaluate(&self, timeout: Duration, task_name: &str) -> bool {
        let check = AssertUnwindSafe(self.predicate.check()).catch_unwind();
        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(Ok(fire))) => fire,
            Ok(Ok(Err(e))) => {
                warn!(task = %task_name, error = %e, "Custom trigger predicate failed");
                false
            }
            Ok(Err(_)) => {
                warn!(task = %task_name, "Custom trigger predicate panicked");
                false
            }
            Err(_) => {
                debug!(task = %task_name, timeout_ms = timeout.as_millis() as u64, "Custom trigger predicate timed out");
                false
            }
        }
    }
}

impl std::fmt::Debug for CustomTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomTrigger")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
