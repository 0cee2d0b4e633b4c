//! Deadlock detector
//!
//! Side table of executions that currently hold a concurrency slot. The
//! permit lives in the table entry, so removing an entry is what releases the
//! slot, whether the execution finished on its own or was force-detached.
//!
//! The detector also keeps a short per-task history of whether each run
//! timed out; the health score reported in diagnostics is derived from it.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::gate::GatePermit;
use super::stats::RunningTaskSummary;

struct InFlight {
    execution_id: Uuid,
    name: String,
    started_at: DateTime<Utc>,
    escalating: bool,
    _permit: GatePermit,
}

/// An execution that has been running longer than the deadlock threshold
#[derive(Debug, Clone)]
pub(crate) struct StuckExecution {
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub name: String,
    pub running_for: Duration,
}

pub(crate) struct DeadlockDetector {
    in_flight: DashMap<Uuid, InFlight>,
    timeouts: DashMap<Uuid, VecDeque<bool>>,
    history_limit: usize,
}

impl DeadlockDetector {
    pub(crate) fn new(history_limit: usize) -> Self {
        Self {
            in_flight: DashMap::new(),
            timeouts: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Track an execution that just acquired its slot
    pub(crate) fn register(&self, task_id: Uuid, name: &str, execution_id: Uuid, permit: GatePermit) {
        self.in_flight.insert(
            task_id,
            InFlight {
                execution_id,
                name: name.to_string(),
                started_at: Utc::now(),
                escalating: false,
                _permit: permit,
            },
        );
    }

    /// Drop the entry (and its slot) if it still belongs to `execution_id`.
    ///
    /// Returns `false` when the execution was already detached.
    pub(crate) fn unregister(&self, task_id: Uuid, execution_id: Uuid) -> bool {
        self.in_flight
            .remove_if(&task_id, |_, entry| entry.execution_id == execution_id)
            .is_some()
    }

    /// Entries older than `threshold` that are not being escalated yet.
    /// Returned entries are marked so the next scan skips them.
    pub(crate) fn stuck(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<StuckExecution> {
        let mut stuck = Vec::new();
        for mut entry in self.in_flight.iter_mut() {
            let task_id = *entry.key();
            let record = entry.value_mut();
            if record.escalating {
                continue;
            }
            let running_for = (now - record.started_at).to_std().unwrap_or_default();
            if running_for <= threshold {
                continue;
            }
            record.escalating = true;
            stuck.push(StuckExecution {
                task_id,
                execution_id: record.execution_id,
                name: record.name.clone(),
                running_for,
            });
        }
        stuck
    }

    /// Append one run to the task's rolling timeout history
    pub(crate) fn record_outcome(&self, task_id: Uuid, timed_out: bool) {
        let mut history = self.timeouts.entry(task_id).or_default();
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(timed_out);
    }

    /// Share of recent runs that did not time out; 1.0 without history
    #[must_use]
    pub(crate) fn health_score(&self, task_id: Uuid) -> f64 {
        match self.timeouts.get(&task_id) {
            Some(history) if !history.is_empty() => {
                let timeouts = history.iter().filter(|timed_out| **timed_out).count();
                1.0 - timeouts as f64 / history.len() as f64
            }
            _ => 1.0,
        }
    }

    /// Drop the timeout history of a removed task. An in-flight entry stays
    /// until its execution ends, since it holds the concurrency slot.
    pub(crate) fn forget(&self, task_id: Uuid) {
        if self.timeouts.remove(&task_id).is_some() {
            debug!(task_id = %task_id, "Dropped timeout history");
        }
    }

    /// Executions currently holding a slot
    pub(crate) fn running(&self, now: DateTime<Utc>) -> Vec<RunningTaskSummary> {
        let mut running: Vec<RunningTaskSummary> = self
            .in_flight
            .iter()
            .map(|entry| RunningTaskSummary {
                id: *entry.key(),
                name: entry.name.clone(),
                execution_id: entry.execution_id,
                running_for_secs: (now - entry.started_at)
                    .to_std()
                    .unwrap_or_default()
                    .as_secs_f64(),
            })
            .collect();
        running.sort_by(|a, b| b.running_for_secs.total_cmp(&a.running_for_secs));
        running
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests;
