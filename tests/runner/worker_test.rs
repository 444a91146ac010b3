//! Dispatcher claiming, retry, and serialization behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sqlx::Row;

use cadence::providers::notify::NoopNotifier;
use cadence::runner::{
    Emitter, EventHandler, HandlerRegistry, RetryPolicy, StageError, StepContext, Worker,
};
use cadence::store::Store;

struct CountingHandler {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl EventHandler for CountingHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &["test.count"]
    }

    async fn handle(&self, _ctx: &StepContext, _payload: serde_json::Value) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingHandler {
    fatal: bool,
}

#[async_trait]
impl EventHandler for FailingHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &["test.fail"]
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(10),
        }
    }

    async fn handle(&self, _ctx: &StepContext, _payload: serde_json::Value) -> Result<(), StageError> {
        if self.fatal {
            Err(StageError::fatal("precondition violated"))
        } else {
            Err(StageError::transient("flaky dependency"))
        }
    }
}

async fn event_status(store: &Store, id: &str) -> String {
    let row = sqlx::query("SELECT status FROM runner_events WHERE id = ?1")
        .bind(id)
        .fetch_one(store.pool())
        .await
        .expect("event row");
    row.try_get::<String, _>("status").expect("status")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn claimed_events_run_and_complete() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let calls = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(CountingHandler {
        calls: Arc::clone(&calls),
    }));
    let worker = Worker::new(store.clone(), Arc::new(registry), Arc::new(NoopNotifier));

    let id = emitter.emit("test.count", &json!({})).await.expect("emit");
    let claimed = worker.tick().await.expect("tick");
    assert_eq!(claimed, 1);
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(event_status(&store, &id).await, "done");
}

#[tokio::test]
async fn unknown_events_fail_without_a_handler() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let worker = Worker::new(
        store.clone(),
        Arc::new(HandlerRegistry::new()),
        Arc::new(NoopNotifier),
    );

    let id = emitter.emit("test.unknown", &json!({})).await.expect("emit");
    worker.tick().await.expect("tick");
    assert_eq!(event_status(&store, &id).await, "failed");
}

#[tokio::test]
async fn transient_failures_requeue_then_die() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(FailingHandler { fatal: false }));
    let worker = Worker::new(store.clone(), Arc::new(registry), Arc::new(NoopNotifier));

    let id = emitter.emit("test.fail", &json!({})).await.expect("emit");
    worker.tick().await.expect("first tick");
    settle().await;
    assert_eq!(event_status(&store, &id).await, "queued", "first failure requeues");

    // Wait out the backoff, then the second attempt exhausts retries.
    tokio::time::sleep(Duration::from_millis(30)).await;
    worker.tick().await.expect("second tick");
    settle().await;
    assert_eq!(event_status(&store, &id).await, "dead");
}

#[tokio::test]
async fn fatal_failures_do_not_retry() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(FailingHandler { fatal: true }));
    let worker = Worker::new(store.clone(), Arc::new(registry), Arc::new(NoopNotifier));

    let id = emitter.emit("test.fail", &json!({})).await.expect("emit");
    worker.tick().await.expect("tick");
    settle().await;
    assert_eq!(event_status(&store, &id).await, "failed");
}

#[tokio::test]
async fn same_key_events_never_run_concurrently() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(CountingHandler {
        calls: Arc::clone(&calls),
    }));
    let worker = Worker::new(store.clone(), Arc::new(registry), Arc::new(NoopNotifier));

    // Two events for the same lead: one claim per tick at most.
    let first = emitter
        .emit("test.count", &json!({"lead_id": 7}))
        .await
        .expect("first");
    let second = emitter
        .emit("test.count", &json!({"lead_id": 7}))
        .await
        .expect("second");

    let claimed = worker.tick().await.expect("tick");
    assert_eq!(claimed, 1, "the serialized key admits one event at a time");
    settle().await;
    assert_eq!(event_status(&store, &first).await, "done");

    let claimed = worker.tick().await.expect("second tick");
    assert_eq!(claimed, 1);
    settle().await;
    assert_eq!(event_status(&store, &second).await, "done");
}
