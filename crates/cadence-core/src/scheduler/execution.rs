//! Execution engine
//!
//! Runs one fired task as its own tokio task:
//! 1. wait for a concurrency slot (or cancellation)
//! 2. register with the deadlock detector, which takes ownership of the slot
//! 3. run the callback under its timeout, catching panics
//! 4. report the outcome to the store and, when retries remain, wait out the
//!    retry delay before re-arming the task
//!
//! Cancellation is cooperative through the task's token. Executions that
//! ignore it are force-detached by [`Executor::cancel_staged`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::callback::TaskContext;
use super::config::SchedulerConfig;
use super::deadlock::DeadlockDetector;
use super::gate::ConcurrencyGate;
use super::stats::ExecutionTotals;
use super::store::TaskStore;
use super::task::{FinishDecision, RunOutcome, RunTicket};
use super::types::ExecutionStatus;
use crate::shutdown::TaskGuard;

/// Control handle of a spawned execution
#[derive(Clone)]
pub(crate) struct ExecutionHandle {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Cooperative stop signal, also visible to the callback
    pub cancel: CancellationToken,
    /// Cancelled once the execution's tokio task has ended (or was dropped)
    pub done: CancellationToken,
    pub abort: AbortHandle,
}

/// Spawns executions and tracks their handles, keyed by task id
pub(crate) struct Executor {
    config: Arc<SchedulerConfig>,
    store: Arc<TaskStore>,
    detector: Arc<DeadlockDetector>,
    gate: ConcurrencyGate,
    totals: Arc<ExecutionTotals>,
    handles: DashMap<Uuid, ExecutionHandle>,
}

impl Executor {
    pub(crate) fn new(
        config: Arc<SchedulerConfig>,
        store: Arc<TaskStore>,
        detector: Arc<DeadlockDetector>,
        gate: ConcurrencyGate,
        totals: Arc<ExecutionTotals>,
    ) -> Self {
        Self {
            config,
            store,
            detector,
            gate,
            totals,
            handles: DashMap::new(),
        }
    }

    /// Spawn the execution described by `ticket`. Never waits.
    pub(crate) fn spawn(self: &Arc<Self>, ticket: RunTicket, cancel: CancellationToken, guard: TaskGuard) {
        let task_id = ticket.task_id;
        let execution_id = ticket.execution_id;
        let done = CancellationToken::new();
        let registered = CancellationToken::new();

        let done_guard = done.clone().drop_guard();
        let gate = registered.clone();
        let run = Arc::clone(self).run(ticket, cancel.clone(), guard);
        let join = tokio::spawn(async move {
            let _done = done_guard;
            // the handle must be in the table before the execution can finish
            gate.cancelled().await;
            run.await;
        });

        self.handles.insert(
            task_id,
            ExecutionHandle {
                execution_id,
                started_at: Utc::now(),
                cancel,
                done,
                abort: join.abort_handle(),
            },
        );
        registered.cancel();
    }

    async fn run(
        self: Arc<Self>,
        ticket: RunTicket,
        cancel: CancellationToken,
        guard: TaskGuard,
    ) {
        let _guard = guard;
        let RunTicket {
            task_id,
            execution_id,
            name,
            attempt,
            timeout,
            params,
            callback,
        } = ticket;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.gate.acquire() => Some(permit),
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = match permit {
            None => RunOutcome::Cancelled("cancelled while waiting for an execution slot".to_string()),
            Some(permit) => {
                self.detector.register(task_id, &name, execution_id, permit);
                debug!(task = %name, task_id = %task_id, attempt, "Task execution started");

                let ctx = TaskContext {
                    task_id,
                    task_name: name.clone(),
                    execution_id,
                    attempt,
                    params,
                    cancellation: cancel.clone(),
                };
                let work = AssertUnwindSafe(callback.execute(ctx)).catch_unwind();

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => RunOutcome::Cancelled("execution cancelled".to_string()),
                    result = tokio::time::timeout(timeout, work) => match result {
                        Ok(Ok(Ok(value))) => RunOutcome::Succeeded(value),
                        Ok(Ok(Err(e))) => RunOutcome::Failed(format!("{:#}", e)),
                        Ok(Err(panic)) => RunOutcome::Failed(format!(
                            "callback panicked: {}",
                            panic_message(panic.as_ref())
                        )),
                        Err(_) => RunOutcome::TimedOut(timeout),
                    },
                };

                if !self.detector.unregister(task_id, execution_id) {
                    debug!(task = %name, task_id = %task_id, "Discarding result of detached execution");
                    return;
                }
                outcome
            }
        };

        let decision = self.settle(task_id, execution_id, &name, started_at, outcome, clock.elapsed());

        if decision == FinishDecision::Retry {
            let delay = self.config.retry_delay;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.store.with_task_mut(task_id, |task| task.abandon_retry());
                    debug!(task = %name, task_id = %task_id, "Pending retry abandoned");
                }
                _ = tokio::time::sleep(delay) => {
                    if self.store.with_task_mut(task_id, |task| task.rearm_for_retry()) == Some(true) {
                        debug!(task = %name, task_id = %task_id, "Task re-armed for retry");
                    }
                }
            }
        }

        self.handles
            .remove_if(&task_id, |_, handle| handle.execution_id == execution_id);
    }

    /// Record an outcome on the task, the totals and the health history
    fn settle(
        &self,
        task_id: Uuid,
        execution_id: Uuid,
        name: &str,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
        elapsed: Duration,
    ) -> FinishDecision {
        let status = outcome.status();
        let timed_out = matches!(outcome, RunOutcome::TimedOut(_));
        let detail = match &outcome {
            RunOutcome::Failed(msg) | RunOutcome::Cancelled(msg) => Some(msg.clone()),
            _ => None,
        };

        let decision = self.store.complete_run(
            task_id,
            execution_id,
            started_at,
            outcome,
            elapsed,
            self.config.retry_delay,
        );
        if decision == FinishDecision::Stale {
            debug!(task = %name, task_id = %task_id, "Task gone before its execution finished");
            return decision;
        }

        self.totals.record(status);
        self.detector.record_outcome(task_id, timed_out);

        let elapsed_ms = elapsed.as_millis() as u64;
        let retrying = decision == FinishDecision::Retry;
        match status {
            ExecutionStatus::Succeeded => {
                info!(task = %name, task_id = %task_id, elapsed_ms, "Task completed");
            }
            ExecutionStatus::Failed => {
                warn!(task = %name, task_id = %task_id, elapsed_ms, retrying, error = ?detail, "Task failed");
            }
            ExecutionStatus::TimedOut => {
                warn!(task = %name, task_id = %task_id, elapsed_ms, retrying, "Task timed out");
            }
            ExecutionStatus::Cancelled => {
                info!(task = %name, task_id = %task_id, elapsed_ms, reason = ?detail, "Task cancelled");
            }
        }
        decision
    }

    /// Cancel a task's execution and escalate until it is gone.
    ///
    /// Waits through each escalation stage for the execution to stop; if it
    /// never does, it is aborted and force-detached. `expected` restricts the
    /// call to one specific execution. Returns `false` if there was nothing
    /// to cancel.
    pub(crate) async fn cancel_staged(&self, task_id: Uuid, expected: Option<Uuid>, reason: &str) -> bool {
        let Some(handle) = self.handle(task_id) else {
            return false;
        };
        if expected.is_some_and(|id| id != handle.execution_id) {
            return false;
        }

        handle.cancel.cancel();
        let mut waited = Duration::ZERO;
        for (stage, wait) in self.config.escalation_stages.iter().enumerate() {
            if tokio::time::timeout(*wait, handle.done.cancelled()).await.is_ok() {
                debug!(task_id = %task_id, stage = stage + 1, "Execution stopped after cancellation");
                return true;
            }
            waited += *wait;
            warn!(
                task_id = %task_id,
                stage = stage + 1,
                waited_ms = waited.as_millis() as u64,
                "Execution still running after cancellation"
            );
        }

        if handle.done.is_cancelled() {
            return true;
        }
        self.force_detach(task_id, &handle, reason);
        true
    }

    /// Abort an execution and settle it as cancelled without waiting for it.
    pub(crate) fn force_detach(&self, task_id: Uuid, handle: &ExecutionHandle, reason: &str) {
        handle.cancel.cancel();
        handle.abort.abort();
        self.handles
            .remove_if(&task_id, |_, h| h.execution_id == handle.execution_id);
        let held_slot = self.detector.unregister(task_id, handle.execution_id);

        let elapsed = (Utc::now() - handle.started_at).to_std().unwrap_or_default();
        let decision = self.store.complete_run(
            task_id,
            handle.execution_id,
            handle.started_at,
            RunOutcome::Cancelled(format!("force-detached: {}", reason)),
            elapsed,
            self.config.retry_delay,
        );
        if decision != FinishDecision::Stale {
            self.totals.record(ExecutionStatus::Cancelled);
            self.detector.record_outcome(task_id, true);
        }

        warn!(
            task_id = %task_id,
            execution_id = %handle.execution_id,
            held_slot,
            reason,
            "Execution force-detached"
        );
    }

    /// Handle of the task's current execution
    pub(crate) fn handle(&self, task_id: Uuid) -> Option<ExecutionHandle> {
        self.handles.get(&task_id).map(|handle| handle.value().clone())
    }

    /// Every tracked execution
    pub(crate) fn handles(&self) -> Vec<(Uuid, ExecutionHandle)> {
        self.handles
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Drop handles of executions that have ended
    pub(crate) fn prune_finished(&self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|_, handle| !handle.done.is_cancelled());
        before.saturating_sub(self.handles.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
