//! The dispatch loop: claims visible events and runs their handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::Row;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::providers::Notifier;
use crate::store::Store;

use super::registry::Registered;
use super::{HandlerRegistry, StageError, StepContext};

/// Operator notification channel for runner failures.
const OPS_CHANNEL: &str = "ops";

/// Claims queued events and dispatches them to registered handlers.
///
/// Multiple worker processes may run concurrently: claims are atomic
/// UPDATEs guarded by status and the per-key serialization check, so an
/// event is only ever running in one place.
pub struct Worker {
    store: Store,
    registry: Arc<HandlerRegistry>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    claim_batch: i64,
}

impl Worker {
    /// Build a worker over the shared store.
    pub fn new(store: Store, registry: Arc<HandlerRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            registry,
            notifier,
            poll_interval: Duration::from_millis(500),
            claim_batch: 16,
        }
    }

    /// Override the poll interval (tests use a short one).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until `shutdown` flips to true. Each tick claims up to a batch
    /// of visible events and spawns their handlers.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            handlers = ?self.registry.event_names(),
            "worker started"
        );
        loop {
            if *shutdown.borrow() {
                info!("worker shutting down");
                return;
            }
            match self.tick().await {
                Ok(claimed) if claimed > 0 => {
                    debug!(claimed, "dispatched events");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "worker tick failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One claim-and-dispatch pass. Returns how many events were claimed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the candidate query fails; individual
    /// handler failures are recorded on their rows instead.
    pub async fn tick(&self) -> Result<usize, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let candidates = sqlx::query(
            "SELECT id, name, attempts FROM runner_events e \
             WHERE status = 'queued' AND visible_at <= ?1 \
             AND (serialization_key IS NULL OR NOT EXISTS \
                  (SELECT 1 FROM runner_events r WHERE r.status = 'running' \
                   AND r.serialization_key = e.serialization_key)) \
             ORDER BY visible_at LIMIT ?2",
        )
        .bind(&now)
        .bind(self.claim_batch)
        .fetch_all(self.store.pool())
        .await?;

        let mut claimed = 0usize;
        for row in candidates {
            let id: String = row.try_get("id")?;
            let name: String = row.try_get("name")?;

            let Some(registered) = self.registry.get(&name) else {
                warn!(event = %id, name = %name, "no handler registered; failing event");
                self.finish(&id, "failed", Some("no handler registered"))
                    .await?;
                continue;
            };

            // Respect the handler's concurrency cap without holding the
            // claim: a saturated handler leaves its events queued.
            let Ok(permit) = Arc::clone(&registered.semaphore).try_acquire_owned() else {
                continue;
            };

            if !self.claim(&id, &now).await? {
                drop(permit);
                continue;
            }
            claimed = claimed.saturating_add(1);

            let attempt = self.current_attempt(&id).await?;
            let payload = self.payload(&id).await?;
            let ctx = StepContext::new(self.store.pool().clone(), id.clone(), attempt);
            let registered = registered.clone();
            let worker = self.clone_refs();
            tokio::spawn(async move {
                let _permit = permit;
                worker
                    .dispatch(registered, ctx, id, name, attempt, payload)
                    .await;
            });
        }
        Ok(claimed)
    }

    /// Atomically move one event queued → running, re-checking the
    /// serialization key under the claim.
    async fn claim(&self, id: &str, now: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runner_events SET status = 'running', attempts = attempts + 1, \
             updated_at = ?1 \
             WHERE id = ?2 AND status = 'queued' \
             AND (serialization_key IS NULL OR NOT EXISTS \
                  (SELECT 1 FROM runner_events r WHERE r.status = 'running' \
                   AND r.serialization_key = runner_events.serialization_key \
                   AND r.id != runner_events.id))",
        )
        .bind(now)
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn current_attempt(&self, id: &str) -> Result<u32, sqlx::Error> {
        let row = sqlx::query("SELECT attempts FROM runner_events WHERE id = ?1")
            .bind(id)
            .fetch_one(self.store.pool())
            .await?;
        let attempts: i64 = row.try_get("attempts")?;
        Ok(u32::try_from(attempts).unwrap_or(1))
    }

    async fn payload(&self, id: &str) -> Result<serde_json::Value, sqlx::Error> {
        let row = sqlx::query("SELECT payload FROM runner_events WHERE id = ?1")
            .bind(id)
            .fetch_one(self.store.pool())
            .await?;
        let raw: String = row.try_get("payload")?;
        Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null))
    }

    fn clone_refs(&self) -> WorkerRefs {
        WorkerRefs {
            store: self.store.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }

    async fn finish(
        &self,
        id: &str,
        status: &str,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        finish_event(&self.store, id, status, last_error).await
    }
}

/// The subset of worker state a spawned dispatch needs.
struct WorkerRefs {
    store: Store,
    notifier: Arc<dyn Notifier>,
}

impl WorkerRefs {
    async fn dispatch(
        &self,
        registered: Registered,
        ctx: StepContext,
        id: String,
        name: String,
        attempt: u32,
        payload: serde_json::Value,
    ) {
        debug!(event = %id, event_name = %name, attempt, "handler starting");
        let outcome = registered.handler.handle(&ctx, payload.clone()).await;
        let result = match outcome {
            Ok(()) => finish_event(&self.store, &id, "done", None).await,
            Err(StageError::NonRetriable(reason)) => {
                error!(event = %id, reason = %reason, "non-retriable failure");
                self.notify_failure(&id, &name, &reason, "failed").await;
                finish_event(&self.store, &id, "failed", Some(&reason)).await
            }
            Err(StageError::Retriable {
                reason,
                backoff_hint,
            }) => {
                let policy = registered.handler.retry_policy();
                if attempt >= policy.max_attempts {
                    error!(event = %id, attempt, reason = %reason, "retries exhausted");
                    self.notify_failure(&id, &name, &reason, "dead").await;
                    finish_event(&self.store, &id, "dead", Some(&reason)).await
                } else {
                    let backoff = policy.backoff(attempt, backoff_hint);
                    let delta = chrono::Duration::from_std(backoff)
                        .unwrap_or_else(|_| chrono::Duration::seconds(30));
                    let next = Utc::now().checked_add_signed(delta).unwrap_or_else(Utc::now);
                    warn!(
                        event = %id, attempt, backoff_secs = backoff.as_secs(),
                        reason = %reason, "requeueing after transient failure"
                    );
                    requeue_event(&self.store, &id, &next.to_rfc3339(), &reason).await
                }
            }
        };
        if let Err(err) = result {
            error!(event = %id, error = %err, "failed to record event outcome");
        }
    }

    async fn notify_failure(&self, id: &str, name: &str, reason: &str, status: &str) {
        let payload = json!({
            "event_id": id,
            "event": name,
            "status": status,
            "reason": reason,
        });
        if let Err(err) = self.notifier.send(OPS_CHANNEL, &payload).await {
            warn!(error = %err, "operator notification failed");
        }
    }
}

async fn finish_event(
    store: &Store,
    id: &str,
    status: &str,
    last_error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE runner_events SET status = ?1, last_error = ?2, updated_at = datetime('now') \
         WHERE id = ?3",
    )
    .bind(status)
    .bind(last_error)
    .bind(id)
    .execute(store.pool())
    .await?;
    Ok(())
}

async fn requeue_event(
    store: &Store,
    id: &str,
    visible_at: &str,
    last_error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE runner_events SET status = 'queued', visible_at = ?1, last_error = ?2, \
         updated_at = datetime('now') WHERE id = ?3",
    )
    .bind(visible_at)
    .bind(last_error)
    .bind(id)
    .execute(store.pool())
    .await?;
    Ok(())
}
