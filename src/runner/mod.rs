//! Durable event runner: at-least-once delivery with checkpointed steps.
//!
//! Every stage is a function over named events. The runner persists the
//! queue, memoizes per-step results so replay after a crash or retry is
//! idempotent, retries with bounded exponential backoff, enforces
//! per-handler concurrency caps and per-key serialization, and schedules
//! cron-declared jobs and wait timers.
//!
//! Handlers never rely on local state surviving a failure: everything
//! across a suspension point goes through the [`StepContext`] or the
//! store.

pub mod context;
pub mod cron;
pub mod error;
pub mod registry;
pub mod worker;

pub use context::StepContext;
pub use error::StageError;
pub use registry::{EventHandler, HandlerRegistry, RetryPolicy};
pub use worker::Worker;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

/// Event names carried on the bus.
pub mod names {
    /// Per-campaign ingestion request (cron fan-out or UI).
    pub const CAMPAIGN_INGEST: &str = "campaign.ingest-data";
    /// One-off ingestion for a single campaign (UI / CLI).
    pub const CAMPAIGN_MANUAL_INGEST: &str = "campaign.manual-ingest";
    /// Daily scan fanning out ingestion per active campaign.
    pub const CAMPAIGN_INGEST_SCAN: &str = "campaign.ingest-scan";
    /// Normalized lead arrival.
    pub const LEAD_INGESTED: &str = "lead.ingested";
    /// Normalized intent-feed lead arrival with score and rank.
    pub const LEAD_INTENT_INGESTED: &str = "lead.intent-ingested";
    /// Lead qualified YES; research may begin.
    pub const LEAD_READY_FOR_DEPLOYMENT: &str = "lead.ready-for-deployment";
    /// Research done; sequence generation may begin.
    pub const LEAD_RESEARCH_COMPLETE: &str = "lead.research-complete";
    /// Generated sequence awaiting review.
    pub const SEQUENCE_REVIEW_REQUESTED: &str = "sequence.review-requested";
    /// Reviewer sent the sequence back with instructions.
    pub const LEAD_SEQUENCE_REVISION_NEEDED: &str = "lead.sequence-revision-needed";
    /// Revision produced; re-review requested.
    pub const LEAD_SEQUENCE_REVISION_COMPLETE: &str = "lead.sequence-revision-complete";
    /// Sequence approved; deployment may begin.
    pub const LEAD_SEQUENCE_READY: &str = "lead.sequence-ready";
    /// Channel or timer event for a deployed lead.
    pub const ORCHESTRATION_EVENT: &str = "orchestration.event";
    /// Per-tenant learning run.
    pub const LEARNING_ANALYZE: &str = "learning.analyze-requested";
    /// Daily scan fanning out learning runs per tenant.
    pub const LEARNING_SCAN: &str = "learning.analyze-scan";
    /// Per-tenant daily summary notification.
    pub const DAILY_SUMMARY: &str = "notify.daily-summary";
}

/// Queue-level errors (distinct from stage errors).
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Queue table access failed.
    #[error("runner database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Payload (de)serialization failed.
    #[error("runner serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Emits events onto the durable queue. Cheap to clone; handlers receive
/// one at construction.
#[derive(Debug, Clone)]
pub struct Emitter {
    pool: SqlitePool,
}

impl Emitter {
    /// Create an emitter over the shared pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue one event; returns its id.
    ///
    /// The serialization key is derived from the payload: `lead_id` keys
    /// lead workflows, otherwise `campaign_id` keys ingestion. Events for
    /// the same key never run concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Database`] on queue write failure.
    pub async fn emit(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<String, RunnerError> {
        self.emit_at(name, payload, Utc::now()).await
    }

    /// Enqueue one event visible at (or after) `visible_at`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Database`] on queue write failure.
    pub async fn emit_at(
        &self,
        name: &str,
        payload: &serde_json::Value,
        visible_at: DateTime<Utc>,
    ) -> Result<String, RunnerError> {
        let id = Uuid::new_v4().to_string();
        let key = serialization_key(payload);
        sqlx::query(
            "INSERT INTO runner_events (id, name, payload, serialization_key, status, visible_at) \
             VALUES (?1, ?2, ?3, ?4, 'queued', ?5)",
        )
        .bind(&id)
        .bind(name)
        .bind(payload.to_string())
        .bind(key)
        .bind(visible_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Enqueue a batch of same-named events; returns their ids in order.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Database`] on queue write failure.
    pub async fn emit_batch(
        &self,
        name: &str,
        payloads: &[serde_json::Value],
    ) -> Result<Vec<String>, RunnerError> {
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            ids.push(self.emit(name, payload).await?);
        }
        Ok(ids)
    }

    /// Arm a wait timer: at or after `fire_at` the sweeper turns it into
    /// an [`names::ORCHESTRATION_EVENT`] with the stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Database`] on queue write failure.
    pub async fn arm_timer(
        &self,
        tenant_id: i64,
        lead_id: i64,
        fire_at: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> Result<(), RunnerError> {
        sqlx::query(
            "INSERT INTO runner_timers (tenant_id, lead_id, fire_at, payload) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(fire_at.to_rfc3339())
        .bind(payload.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Derive the per-key serialization key from a payload.
fn serialization_key(payload: &serde_json::Value) -> Option<String> {
    if let Some(lead) = payload.get("lead_id").and_then(serde_json::Value::as_i64) {
        return Some(format!("lead:{lead}"));
    }
    payload
        .get("campaign_id")
        .and_then(serde_json::Value::as_i64)
        .map(|c| format!("campaign:{c}"))
}
