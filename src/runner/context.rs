//! Checkpointed step execution within a handler invocation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::trace;

use super::StageError;

/// Step context threaded through stage code.
//
// Each named step's result is memoized in `runner_steps`; on replay after
// a crash or retry the stored result is returned without re-executing the
// step. Only successful results are persisted — failures re-run.
#[derive(Debug, Clone)]
pub struct StepContext {
    pool: SqlitePool,
    event_id: String,
    attempt: u32,
}

impl StepContext {
    /// Build a context for one handler invocation.
    pub fn new(pool: SqlitePool, event_id: String, attempt: u32) -> Self {
        Self {
            pool,
            event_id,
            attempt,
        }
    }

    /// The queue event id this invocation is processing.
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// 1-based delivery attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Run a named step exactly once per event.
    ///
    /// The first successful execution persists the serialized result;
    /// subsequent replays return it without executing `fut`. Code between
    /// two checkpoints must not await external systems unboundedly.
    ///
    /// # Errors
    ///
    /// Propagates the step's own [`StageError`], or a retriable error if
    /// the memo table cannot be read or written.
    pub async fn run<T, F>(&self, name: &str, fut: F) -> Result<T, StageError>
    where
        T: Serialize + DeserializeOwned,
        F: std::future::Future<Output = Result<T, StageError>>,
    {
        if let Some(saved) = self.load(name).await? {
            trace!(event = %self.event_id, step = name, "step replayed from checkpoint");
            return Ok(saved);
        }
        let value = fut.await?;
        self.save(name, &value).await?;
        Ok(value)
    }

    async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StageError> {
        let row = sqlx::query(
            "SELECT result FROM runner_steps WHERE event_id = ?1 AND step_name = ?2",
        )
        .bind(&self.event_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StageError::transient(format!("step memo read: {e}")))?;

        row.map(|row| {
            let raw: String = row
                .try_get("result")
                .map_err(|e| StageError::transient(format!("step memo read: {e}")))?;
            serde_json::from_str(&raw)
                .map_err(|e| StageError::transient(format!("step memo decode: {e}")))
        })
        .transpose()
    }

    async fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StageError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StageError::transient(format!("step memo encode: {e}")))?;
        sqlx::query(
            "INSERT OR IGNORE INTO runner_steps (event_id, step_name, result) VALUES (?1, ?2, ?3)",
        )
        .bind(&self.event_id)
        .bind(name)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| StageError::transient(format!("step memo write: {e}")))?;
        Ok(())
    }
}
