//! Scheduler execution engine
//!
//! Owns the task store and the three background loops:
//! - check loop: fires due time tasks and evaluates custom predicates
//! - deadlock loop: escalates cancellation of executions that run too long
//! - cleanup loop: archives finished one-shot tasks
//!
//! With an attached [`EventBus`] a fourth loop forwards published events to
//! [`SchedulerEngine::on_event`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SchedulerConfig;
use super::deadlock::DeadlockDetector;
use super::execution::Executor;
use super::gate::ConcurrencyGate;
use super::stats::{ExecutionTotals, SchedulerStats};
use super::store::TaskStore;
use super::task::{ScheduleRequest, ScheduledTask, TaskInfo};
use super::types::{Result, SchedulerError, TaskStatus, TriggerKind};
use crate::event_bus::{BusEvent, EventBus};
use crate::shutdown::ShutdownController;

#[derive(Default)]
struct Lifecycle {
    running: AtomicBool,
    controller: Mutex<Option<Arc<ShutdownController>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scheduler engine
///
/// Cheap to clone; clones share the same store and loops.
#[derive(Clone)]
pub struct SchedulerEngine {
    config: Arc<SchedulerConfig>,
    store: Arc<TaskStore>,
    detector: Arc<DeadlockDetector>,
    gate: ConcurrencyGate,
    totals: Arc<ExecutionTotals>,
    executor: Arc<Executor>,
    lifecycle: Arc<Lifecycle>,
    event_bus: Option<EventBus>,
}

impl SchedulerEngine {
    /// Create an engine without an event bus
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        SchedulerEngineBuilder::new().config(config).build()
    }

    /// Start building an engine
    pub fn builder() -> SchedulerEngineBuilder {
        SchedulerEngineBuilder::new()
    }

    fn from_parts(config: SchedulerConfig, event_bus: Option<EventBus>) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(TaskStore::new(config.completed_history_limit));
        let detector = Arc::new(DeadlockDetector::new(config.timeout_history_limit));
        let gate = ConcurrencyGate::new(config.max_concurrent);
        let totals = Arc::new(ExecutionTotals::default());
        let executor = Arc::new(Executor::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&detector),
            gate.clone(),
            Arc::clone(&totals),
        ));
        Self {
            config,
            store,
            detector,
            gate,
            totals,
            executor,
            lifecycle: Arc::new(Lifecycle::default()),
            event_bus,
        }
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Attached event bus, if any
    #[must_use]
    pub fn event_bus(&self) -> Option<&EventBus> {
        self.event_bus.as_ref()
    }

    /// Whether the loops are running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.running.load(Ordering::SeqCst)
    }

    fn controller(&self) -> Option<Arc<ShutdownController>> {
        lock(&self.lifecycle.controller).clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the background loops
    pub async fn start(&self) -> Result<()> {
        if self
            .lifecycle
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let controller = ShutdownController::with_timeout(self.config.shutdown_timeout);
        *lock(&self.lifecycle.controller) = Some(Arc::clone(&controller));
        *lock(&self.lifecycle.started_at) = Some(Utc::now());

        let mut loops = vec![
            tokio::spawn(self.clone().check_loop(controller.token())),
            tokio::spawn(self.clone().deadlock_loop(controller.token())),
            tokio::spawn(self.clone().cleanup_loop(controller.token())),
        ];
        if let Some(bus) = &self.event_bus {
            loops.push(tokio::spawn(
                self.clone().event_loop(bus.subscribe(), controller.token()),
            ));
        }
        *lock(&self.lifecycle.loops) = loops;

        info!(
            check_interval_ms = self.config.check_interval.as_millis() as u64,
            max_concurrent = ?self.config.max_concurrent,
            event_bus = self.event_bus.is_some(),
            "Scheduler engine started"
        );
        Ok(())
    }

    /// Stop the loops and cancel running executions.
    ///
    /// Executions get `shutdown_timeout` to finish after the cancel signal;
    /// whatever is left is force-detached.
    pub async fn stop(&self) {
        if self
            .lifecycle
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Scheduler engine is not running");
            return;
        }
        info!("Scheduler engine shutting down");

        let controller = lock(&self.lifecycle.controller).take();
        let loops = std::mem::take(&mut *lock(&self.lifecycle.loops));

        if let Some(controller) = controller {
            let remaining = controller.shutdown().await;
            if remaining > 0 {
                warn!(remaining, "Executions still running after drain timeout");
            }
        }

        for (task_id, handle) in self.executor.handles() {
            if !handle.done.is_cancelled() {
                self.executor.force_detach(task_id, &handle, "scheduler stopped");
            }
        }

        for handle in loops {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "Scheduler loop panicked");
                }
            }
        }

        *lock(&self.lifecycle.started_at) = None;
        info!("Scheduler engine stopped");
    }

    // =========================================================================
    // Management API
    // =========================================================================

    /// Register a task and return its id.
    ///
    /// With `force_overwrite`, an active task holding the same name is
    /// removed and its running execution cancelled.
    pub fn create_schedule(&self, request: ScheduleRequest) -> Result<Uuid> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        request.trigger.validate(request.recurring)?;
        if request.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(SchedulerError::InvalidConfig(
                "timeout must be positive".to_string(),
            ));
        }

        let replace = request.force_overwrite;
        let task = ScheduledTask::from_request(request, &self.config);
        let (id, name, kind, recurring) = (task.id, task.name.clone(), task.kind(), task.recurring);

        if let Some(old) = self.store.insert(task, replace)? {
            self.detector.forget(old.id);
            self.retire(old.id, "replaced by a task with the same name");
            info!(task = %name, old_id = %old.id, new_id = %id, "Replaced existing task");
        }

        info!(task = %name, task_id = %id, kind = %kind, recurring, "Task scheduled");
        Ok(id)
    }

    /// Cancel the execution of a task that is no longer in the store
    fn retire(&self, task_id: Uuid, reason: &'static str) {
        let Some(handle) = self.executor.handle(task_id) else {
            return;
        };
        handle.cancel.cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let executor = Arc::clone(&self.executor);
                runtime.spawn(async move {
                    executor.cancel_staged(task_id, Some(handle.execution_id), reason).await;
                });
            }
            Err(_) => warn!(task_id = %task_id, "No runtime to escalate cancellation on"),
        }
    }

    /// Remove a task, cancelling its execution through the escalation stages.
    ///
    /// Returns `false` for unknown ids.
    pub async fn remove_schedule(&self, id: Uuid) -> bool {
        let Some(task) = self.store.remove(id) else {
            return false;
        };
        self.detector.forget(id);
        if self.executor.cancel_staged(id, None, "task removed").await {
            debug!(task = %task.name, task_id = %id, "Cancelled execution of removed task");
        }
        info!(task = %task.name, task_id = %id, "Task removed");
        true
    }

    /// Remove a task by name
    pub async fn remove_schedule_by_name(&self, name: &str) -> bool {
        match self.store.find_by_name(name) {
            Some(id) => self.remove_schedule(id).await,
            None => false,
        }
    }

    /// Look up a task id by name
    #[must_use]
    pub fn find_schedule_by_name(&self, name: &str) -> Option<Uuid> {
        self.store.find_by_name(name)
    }

    /// Hold a Pending task back from triggering
    pub fn pause_schedule(&self, id: Uuid) -> Result<()> {
        let name = self
            .store
            .with_task_mut(id, |task| match task.status {
                TaskStatus::Pending => {
                    task.status = TaskStatus::Paused;
                    Ok(task.name.clone())
                }
                TaskStatus::Running => Err(SchedulerError::TaskRunning(id)),
                status => Err(SchedulerError::InvalidState {
                    id,
                    status,
                    operation: "pause",
                }),
            })
            .ok_or(SchedulerError::TaskNotFound(id))??;
        info!(task = %name, task_id = %id, "Task paused");
        Ok(())
    }

    /// Return a Paused task to Pending
    pub fn resume_schedule(&self, id: Uuid) -> Result<()> {
        self.store.resume(id)?;
        info!(task_id = %id, "Task resumed");
        Ok(())
    }

    /// Fire a Pending task now, bypassing its trigger
    pub fn trigger_schedule(&self, id: Uuid) -> Result<()> {
        self.fire(id, &Map::new(), "manual").map(|_| ())
    }

    /// Diagnostics for one task
    #[must_use]
    pub fn task_info(&self, id: Uuid) -> Option<TaskInfo> {
        self.store
            .with_task(id, |task| task.info(self.detector.health_score(task.id)))
    }

    /// Diagnostics for all live tasks, oldest first, optionally filtered
    #[must_use]
    pub fn list_tasks(&self, kind: Option<TriggerKind>, status: Option<TaskStatus>) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self
            .store
            .map_all(|task| {
                let keep = kind.is_none_or(|kind| task.kind() == kind)
                    && status.is_none_or(|status| task.status == status);
                keep.then(|| task.info(self.detector.health_score(task.id)))
            })
            .into_iter()
            .flatten()
            .collect();
        tasks.sort_by_key(|info| info.created_at);
        tasks
    }

    /// Archived one-shot tasks, oldest first
    #[must_use]
    pub fn recently_completed(&self) -> Vec<TaskInfo> {
        self.store.archived()
    }

    /// Aggregate statistics
    #[must_use]
    pub fn statistics(&self) -> SchedulerStats {
        let now = Utc::now();

        let mut by_status: HashMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        let mut by_kind: HashMap<String, usize> = TriggerKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), 0))
            .collect();
        let mut recurring = 0;
        let rows = self
            .store
            .map_all(|task| (task.status, task.kind(), task.recurring));
        for (status, kind, is_recurring) in &rows {
            *by_status.entry(status.as_str().to_string()).or_default() += 1;
            *by_kind.entry(kind.as_str().to_string()).or_default() += 1;
            if *is_recurring {
                recurring += 1;
            }
        }

        let uptime_secs = lock(&self.lifecycle.started_at)
            .map(|started| (now - started).to_std().unwrap_or_default().as_secs_f64())
            .unwrap_or(0.0);
        let totals = self.totals.snapshot();

        SchedulerStats {
            running: self.is_running(),
            uptime_secs,
            total_tasks: rows.len(),
            by_status,
            by_kind,
            recurring,
            one_shot: rows.len() - recurring,
            subscribed_events: self.store.subscribed_events(),
            total_executions: totals.executions,
            total_successes: totals.successes,
            total_failures: totals.failures,
            total_timeouts: totals.timeouts,
            total_cancellations: totals.cancellations,
            success_rate: totals.success_rate(),
            archived_count: self.store.archived().len(),
            running_tasks: self.detector.running(now),
            max_concurrent: self.gate.capacity(),
            available_slots: self.gate.available_slots(),
            default_timeout_secs: self.config.default_timeout.as_secs_f64(),
            default_max_retries: self.config.default_max_retries,
            retry_delay_secs: self.config.retry_delay.as_secs_f64(),
            deadlock_threshold_secs: self.config.deadlock_threshold.as_secs_f64(),
        }
    }

    // =========================================================================
    // Event ingress
    // =========================================================================

    /// Trigger every Pending task subscribed to `event_name`.
    ///
    /// `params` are merged over each task's bound parameters. Returns the
    /// number of tasks triggered.
    pub fn on_event(&self, event_name: &str, params: Map<String, Value>) -> usize {
        let subscribers = self.store.subscribers(event_name);
        if subscribers.is_empty() {
            debug!(event = event_name, "No subscribers for event");
            return 0;
        }

        let mut triggered = 0;
        for id in subscribers {
            let pending = self
                .store
                .with_task(id, |task| task.status == TaskStatus::Pending)
                .unwrap_or(false);
            if !pending {
                continue;
            }
            match self.fire(id, &params, "event") {
                Ok(_) => triggered += 1,
                Err(e) => debug!(event = event_name, task_id = %id, error = %e, "Subscriber not triggered"),
            }
        }

        debug!(event = event_name, triggered, "Event dispatched");
        triggered
    }

    // =========================================================================
    // Loop bodies
    // =========================================================================

    /// Pending → Running and spawn the execution
    fn fire(&self, task_id: Uuid, params: &Map<String, Value>, source: &'static str) -> Result<Uuid> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        let controller = self
            .controller()
            .filter(|controller| controller.is_accepting_work())
            .ok_or(SchedulerError::NotRunning)?;

        let ticket = self.store.begin_run(task_id, Utc::now(), params)?;
        let execution_id = ticket.execution_id;
        debug!(task = %ticket.name, task_id = %task_id, source, "Task triggered");

        self.executor
            .spawn(ticket, controller.token(), controller.register_task());
        Ok(execution_id)
    }

    /// One check tick. Returns the number of tasks fired.
    pub(crate) async fn check_and_execute(&self) -> usize {
        let scan = self.store.scan_due(Utc::now());
        let mut fired = 0;

        for id in scan.time_due {
            match self.fire(id, &Map::new(), "time") {
                Ok(_) => fired += 1,
                Err(e) => debug!(task_id = %id, error = %e, "Due task not fired"),
            }
        }

        if !scan.custom.is_empty() {
            let timeout = self.config.predicate_timeout;
            let checks = scan.custom.iter().map(|(id, name, trigger)| async move {
                (*id, trigger.evaluate(timeout, name).await)
            });
            for (id, should_fire) in futures::future::join_all(checks).await {
                if !should_fire {
                    continue;
                }
                match self.fire(id, &Map::new(), "custom") {
                    Ok(_) => fired += 1,
                    Err(e) => debug!(task_id = %id, error = %e, "Custom task not fired"),
                }
            }
        }

        if fired > 0 {
            debug!(fired, "Check tick fired tasks");
        }
        fired
    }

    /// One deadlock scan. Returns the number of executions escalated.
    pub(crate) fn check_deadlocks(&self) -> usize {
        let stuck = self
            .detector
            .stuck(Utc::now(), self.config.deadlock_threshold);
        for execution in &stuck {
            warn!(
                task = %execution.name,
                task_id = %execution.task_id,
                running_secs = execution.running_for.as_secs(),
                "Possible deadlock detected, escalating cancellation"
            );
            let executor = Arc::clone(&self.executor);
            let (task_id, execution_id) = (execution.task_id, execution.execution_id);
            tokio::spawn(async move {
                executor
                    .cancel_staged(task_id, Some(execution_id), "deadlock detected")
                    .await;
            });
        }
        stuck.len()
    }

    /// One cleanup pass. Returns the number of tasks archived.
    pub(crate) fn run_cleanup(&self) -> usize {
        let archived = self
            .store
            .archive_finished(|task| task.info(self.detector.health_score(task.id)));
        for id in &archived {
            self.detector.forget(*id);
        }
        let pruned = self.executor.prune_finished();

        if !archived.is_empty() || pruned > 0 {
            debug!(
                archived = archived.len(),
                pruned_handles = pruned,
                tracked_handles = self.executor.len(),
                "Cleanup pass finished"
            );
        }
        archived.len()
    }

    async fn check_loop(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {
                    if AssertUnwindSafe(self.check_and_execute()).catch_unwind().await.is_err() {
                        error!("Scheduler check panicked");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        debug!("Check loop stopped");
    }

    async fn deadlock_loop(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.deadlock_check_interval) => {
                    if std::panic::catch_unwind(AssertUnwindSafe(|| self.check_deadlocks())).is_err() {
                        error!("Deadlock check panicked");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        debug!("Deadlock loop stopped");
    }

    async fn cleanup_loop(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.cleanup_interval) => {
                    if std::panic::catch_unwind(AssertUnwindSafe(|| self.run_cleanup())).is_err() {
                        error!("Cleanup pass panicked");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        debug!("Cleanup loop stopped");
    }

    async fn event_loop(self, mut events: broadcast::Receiver<BusEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(BusEvent { name, params }) => {
                        self.on_event(&name, params);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Event listener stopped");
    }
}

/// Builder for creating SchedulerEngine
#[derive(Default)]
pub struct SchedulerEngineBuilder {
    config: SchedulerConfig,
    event_bus: Option<EventBus>,
}

impl SchedulerEngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Forward events published on `bus` while the engine runs
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<SchedulerEngine> {
        self.config.validate()?;
        Ok(SchedulerEngine::from_parts(self.config, self.event_bus))
    }
}
