//! In-memory task store
//!
//! Holds the live task records together with the two secondary indexes the
//! management API relies on (name → id, event → subscribers) and the bounded
//! archive of finished one-shot tasks. Every mutation updates all of them.
//!
//! Lock order is always names → tasks; no method holds a task entry while
//! touching the name index.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::task::{FinishDecision, RunOutcome, RunTicket, ScheduledTask, TaskInfo};
use super::triggers::{CustomTrigger, TriggerConfig};
use super::types::{Result, SchedulerError, TaskStatus};

/// Live task registry
pub struct TaskStore {
    tasks: DashMap<Uuid, ScheduledTask>,
    names: DashMap<String, Uuid>,
    subscriptions: DashMap<String, HashSet<Uuid>>,
    archive: Mutex<VecDeque<TaskInfo>>,
    archive_limit: usize,
}

/// Work found by one check tick
#[derive(Debug, Default)]
pub(crate) struct DueScan {
    /// Time-triggered tasks that are due
    pub time_due: Vec<Uuid>,
    /// Pending custom-triggered tasks whose predicate must be evaluated
    pub custom: Vec<(Uuid, String, CustomTrigger)>,
}

impl TaskStore {
    /// Create an empty store keeping at most `archive_limit` archived tasks
    pub fn new(archive_limit: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            names: DashMap::new(),
            subscriptions: DashMap::new(),
            archive: Mutex::new(VecDeque::new()),
            archive_limit,
        }
    }

    /// Install a task.
    ///
    /// Fails with `NameConflict` if the name's owner is active or waiting to
    /// retry, unless `replace` is set; then that task is taken out of the
    /// store and returned so the caller can cancel its execution.
    pub fn insert(&self, task: ScheduledTask, replace: bool) -> Result<Option<ScheduledTask>> {
        let id = task.id;
        let event = task.trigger.event_name().map(str::to_string);
        let mut replaced = None;

        match self.names.entry(task.name.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = *slot.get();
                if self.holds_name(existing) {
                    if !replace {
                        return Err(SchedulerError::NameConflict {
                            name: task.name,
                            existing,
                        });
                    }
                    replaced = self.tasks.remove(&existing).map(|(_, old)| old);
                }
                slot.insert(id);
                self.tasks.insert(id, task);
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
                self.tasks.insert(id, task);
            }
        }

        if let Some(old) = &replaced {
            self.unsubscribe(old);
            debug!(old = %old.id, new = %id, name = %old.name, "Replaced active task");
        }
        if let Some(event) = event {
            self.subscriptions.entry(event).or_default().insert(id);
        }
        Ok(replaced)
    }

    /// Remove a task and clean up its index entries
    pub fn remove(&self, id: Uuid) -> Option<ScheduledTask> {
        let (_, task) = self.tasks.remove(&id)?;
        self.names.remove_if(&task.name, |_, owner| *owner == id);
        self.unsubscribe(&task);
        Some(task)
    }

    fn unsubscribe(&self, task: &ScheduledTask) {
        if let Some(event) = task.trigger.event_name() {
            if let Some(mut subscribers) = self.subscriptions.get_mut(event) {
                subscribers.remove(&task.id);
            }
            self.subscriptions.remove_if(event, |_, subscribers| subscribers.is_empty());
        }
    }

    fn holds_name(&self, id: Uuid) -> bool {
        self.tasks.get(&id).is_some_and(|task| task.holds_name())
    }

    /// Look up a live task id by name
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Uuid> {
        let id = *self.names.get(name)?;
        self.tasks.contains_key(&id).then_some(id)
    }

    /// Whether the id is live
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Read a task
    pub fn with_task<R>(&self, id: Uuid, f: impl FnOnce(&ScheduledTask) -> R) -> Option<R> {
        self.tasks.get(&id).map(|task| f(task.value()))
    }

    /// Mutate a task
    pub fn with_task_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut ScheduledTask) -> R) -> Option<R> {
        self.tasks.get_mut(&id).map(|mut task| f(task.value_mut()))
    }

    /// Read every live task
    pub fn map_all<R>(&self, mut f: impl FnMut(&ScheduledTask) -> R) -> Vec<R> {
        self.tasks.iter().map(|entry| f(entry.value())).collect()
    }

    /// Pending → Running for one task
    pub(crate) fn begin_run(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        params: &Map<String, Value>,
    ) -> Result<RunTicket> {
        let mut task = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidState {
                id,
                status: task.status,
                operation: "trigger",
            });
        }
        Ok(task.begin_run(now, params))
    }

    /// Report an execution outcome. A removed task counts as stale.
    pub(crate) fn complete_run(
        &self,
        id: Uuid,
        execution_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
        duration: Duration,
        retry_delay: Duration,
    ) -> FinishDecision {
        self.with_task_mut(id, |task| {
            task.finish_run(execution_id, started_at, outcome, duration, retry_delay)
        })
        .unwrap_or(FinishDecision::Stale)
    }

    /// Paused → Pending, reclaiming the name index entry.
    ///
    /// Another task may have taken the name while this one was paused; if
    /// that task still holds it the resume is refused.
    pub(crate) fn resume(&self, id: Uuid) -> Result<()> {
        let name = self
            .with_task(id, |task| task.name.clone())
            .ok_or(SchedulerError::TaskNotFound(id))?;

        let mut owner = self.names.entry(name.clone()).or_insert(id);
        if *owner != id && self.holds_name(*owner) {
            return Err(SchedulerError::NameConflict {
                name,
                existing: *owner,
            });
        }

        let mut task = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        if task.status != TaskStatus::Paused {
            return Err(SchedulerError::InvalidState {
                id,
                status: task.status,
                operation: "resume",
            });
        }
        task.status = TaskStatus::Pending;
        *owner = id;
        Ok(())
    }

    /// Collect the tasks a check tick has to look at
    pub(crate) fn scan_due(&self, now: DateTime<Utc>) -> DueScan {
        let mut scan = DueScan::default();
        for entry in self.tasks.iter() {
            let task = entry.value();
            if task.status != TaskStatus::Pending {
                continue;
            }
            match &task.trigger {
                TriggerConfig::Time(_) if task.is_time_due(now) => scan.time_due.push(task.id),
                TriggerConfig::Custom(custom) => {
                    scan.custom.push((task.id, task.name.clone(), custom.clone()))
                }
                _ => {}
            }
        }
        scan
    }

    /// Ids subscribed to an event
    #[must_use]
    pub fn subscribers(&self, event: &str) -> Vec<Uuid> {
        self.subscriptions
            .get(event)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Event names with at least one subscriber, sorted
    #[must_use]
    pub fn subscribed_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        events.sort();
        events
    }

    /// Move finished one-shot tasks into the archive.
    ///
    /// `snapshot` renders the archived entry (the engine adds the health score).
    pub fn archive_finished(&self, mut snapshot: impl FnMut(&ScheduledTask) -> TaskInfo) -> Vec<Uuid> {
        let candidates: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().is_archivable())
            .map(|entry| *entry.key())
            .collect();

        let mut archived = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some((_, task)) = self.tasks.remove_if(&id, |_, task| task.is_archivable()) else {
                continue;
            };
            self.names.remove_if(&task.name, |_, owner| *owner == id);
            self.unsubscribe(&task);
            self.push_archive(snapshot(&task));
            archived.push(id);
        }
        archived
    }

    fn push_archive(&self, info: TaskInfo) {
        if self.archive_limit == 0 {
            return;
        }
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        while archive.len() >= self.archive_limit {
            archive.pop_front();
        }
        archive.push_back(info);
    }

    /// Archived tasks, oldest first
    #[must_use]
    pub fn archived(&self) -> Vec<TaskInfo> {
        self.archive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of live tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
