//! Integration tests for Cadence
//!
//! These tests drive cadence-core through its public API only:
//! - scheduler: registration, triggering, retries and diagnostics
//! - event_bus: events published on the bus reaching subscribed tasks
//! - shutdown: bounded draining of work registered with a controller

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{
    callback_fn, EventBus, ExecutionStatus, ScheduleRequest, SchedulerConfig, SchedulerEngine,
    ShutdownController, ShutdownPhase, TaskContext, TaskStatus, TriggerConfig, TriggerKind,
};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

fn test_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_check_interval(Duration::from_millis(20))
        .with_deadlock_check_interval(Duration::from_millis(50))
        .with_cleanup_interval(Duration::from_millis(100))
        .with_retry_delay(Duration::from_millis(50))
        .with_shutdown_timeout(Duration::from_secs(1))
}

async fn eventually(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Event Bus → Scheduler Integration Tests
// ============================================================================

#[tokio::test]
async fn test_bus_events_drive_recurring_task() {
    let bus = EventBus::default();
    let engine = SchedulerEngine::builder()
        .config(test_config())
        .event_bus(bus.clone())
        .build()
        .unwrap();
    engine.start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback = callback_fn(move |ctx: TaskContext| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((ctx.param("order").cloned(), ctx.param("queue").cloned()));
            Ok(json!("processed"))
        }
    });
    let id = engine
        .create_schedule(
            ScheduleRequest::new(callback, TriggerConfig::event("order.created"))
                .recurring(true)
                .with_name("order-processor")
                .with_param("queue", json!("default")),
        )
        .unwrap();

    for order in 1..=2 {
        let mut params = Map::new();
        params.insert("order".to_string(), json!(order));
        bus.publish("order.created", params);

        let (got_order, queue) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_order, Some(json!(order)));
        assert_eq!(queue, Some(json!("default")));
        assert!(
            eventually(Duration::from_secs(1), || {
                engine.task_info(id).map(|t| t.success_count) == Some(order)
            })
            .await
        );
    }

    let info = engine.task_info(id).unwrap();
    assert_eq!(info.trigger_count, 2);
    assert_eq!(info.status, TaskStatus::Pending);
    assert_eq!(info.trigger_kind, TriggerKind::Event);
    assert!(info
        .recent_executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Succeeded));

    engine.stop().await;
}

// ============================================================================
// Retry Integration Tests
// ============================================================================

#[tokio::test]
async fn test_flaky_time_task_recovers_through_retry() {
    let engine = SchedulerEngine::new(test_config()).unwrap();
    engine.start().await.unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let callback = callback_fn(move |ctx: TaskContext| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            if ctx.attempt < 2 {
                anyhow::bail!("transient failure on attempt {}", ctx.attempt);
            }
            Ok(Value::from(ctx.attempt))
        }
    });
    let id = engine
        .create_schedule(
            ScheduleRequest::new(callback, TriggerConfig::delay(Duration::from_millis(30)))
                .with_max_retries(2),
        )
        .unwrap();

    assert!(
        eventually(Duration::from_secs(2), || {
            engine.recently_completed().iter().any(|t| t.id == id)
        })
        .await
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let archived = engine
        .recently_completed()
        .into_iter()
        .find(|t| t.id == id)
        .unwrap();
    assert_eq!(archived.status, TaskStatus::Completed);
    assert_eq!(archived.failure_count, 1);
    assert_eq!(archived.success_count, 1);
    assert_eq!(archived.recent_executions.len(), 2);
    assert_eq!(archived.recent_executions[1].result, Some(json!(2)));

    let stats = engine.statistics();
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.success_rate, 0.5);
    assert_eq!(stats.archived_count, 1);

    engine.stop().await;
}

// ============================================================================
// Statistics Integration Tests
// ============================================================================

#[tokio::test]
async fn test_statistics_serialize_for_reporting() {
    let engine = SchedulerEngine::new(test_config().with_max_concurrent(None)).unwrap();
    engine.start().await.unwrap();
    engine
        .create_schedule(ScheduleRequest::new(
            callback_fn(|_ctx| async { Ok(Value::Null) }),
            TriggerConfig::event("never"),
        ))
        .unwrap();

    let stats = serde_json::to_value(engine.statistics()).unwrap();
    assert_eq!(stats["running"], json!(true));
    assert_eq!(stats["total_tasks"], json!(1));
    assert_eq!(stats["by_kind"]["event"], json!(1));
    assert_eq!(stats["max_concurrent"], Value::Null);
    assert_eq!(stats["subscribed_events"], json!(["never"]));

    let info = serde_json::to_value(engine.list_tasks(None, None)).unwrap();
    assert_eq!(info[0]["status"], json!("pending"));
    assert_eq!(info[0]["trigger_config"]["event_name"], json!("never"));

    engine.stop().await;
}

// ============================================================================
// Shutdown Integration Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_controller_drains_worker() {
    let controller = ShutdownController::with_timeout(Duration::from_secs(1));
    let guard = controller.register_task();
    let worker = tokio::spawn(async move {
        guard.token().cancelled().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
    });

    let remaining = controller.shutdown().await;
    assert_eq!(remaining, 0);
    assert_eq!(controller.phase(), ShutdownPhase::Terminated);
    worker.await.unwrap();
}
