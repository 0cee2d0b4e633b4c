//! Units of work and predicates handed to the scheduler
//!
//! The scheduler never looks inside a callback: it only calls
//! [`TaskCallback::execute`] with a [`TaskContext`] and records whatever comes
//! back. Custom triggers work the same way through [`TriggerPredicate`].

use std::future::Future;
use std::panic;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-execution context passed to a callback
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task ID
    pub task_id: Uuid,
    /// Task name
    pub task_name: String,
    /// ID of this execution
    pub execution_id: Uuid,
    /// Retry attempt number (1 for the first try)
    pub attempt: u32,
    /// Bound parameters, with event parameters merged over them
    pub params: Map<String, Value>,
    /// Cancelled when the scheduler wants this execution to stop
    pub cancellation: CancellationToken,
}

impl TaskContext {
    /// Look up a parameter by key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Whether cancellation has been requested for this execution.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A unit of work the scheduler can run.
///
/// Implementations should return promptly once `ctx.cancellation` fires; the
/// scheduler copes with ones that don't, but only by detaching them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskCallback: Send + Sync {
    /// Run the task once.
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<Value>;
}

/// Closure adapter for [`TaskCallback`]
pub struct FnCallback<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskCallback for FnCallback<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<Value> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as a task callback.
///
/// ```ignore
/// let cb = callback_fn(|ctx| async move {
///     tracing::info!(task = %ctx.task_name, "tick");
///     Ok(serde_json::Value::Null)
/// });
/// ```
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn TaskCallback>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnCallback { f })
}

/// Zero-argument condition polled by custom triggers.
#[async_trait]
pub trait TriggerPredicate: Send + Sync {
    /// Whether the task should fire now. Errors count as "no".
    async fn check(&self) -> anyhow::Result<bool>;
}

/// Runs on the blocking pool so a slow closure can be timed out without
/// stalling the check loop.
struct SyncPredicate<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> TriggerPredicate for SyncPredicate<F>
where
    F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
{
    async fn check(&self) -> anyhow::Result<bool> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow::anyhow!("predicate task failed: {}", e)),
        }
    }
}

struct AsyncPredicate<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TriggerPredicate for AsyncPredicate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn check(&self) -> anyhow::Result<bool> {
        (self.f)().await
    }
}

/// Wrap a synchronous closure as a predicate. Each check runs the closure on
/// tokio's blocking pool.
pub fn predicate_fn<F>(f: F) -> Arc<dyn TriggerPredicate>
where
    F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(SyncPredicate { f: Arc::new(f) })
}

/// Wrap an async closure as a predicate.
pub fn predicate_async<F, Fut>(f: F) -> Arc<dyn TriggerPredicate>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(AsyncPredicate { f })
}

#[cfg(test)]
mod tests;
