//! Learned patterns, element performance, and baseline metrics.

use sqlx::Row;

use crate::types::InvalidEnum;

use super::{Store, StoreError};

/// Learned-pattern lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternStatus {
    /// Discovered, not yet validated.
    Candidate,
    /// Passed validation thresholds.
    Validated,
    /// Promoted into RAG and prompts.
    Active,
    /// Lift decayed; kept for history.
    Retired,
}

impl PatternStatus {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Validated => "validated",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "candidate" => Ok(Self::Candidate),
            "validated" => Ok(Self::Validated),
            "active" => Ok(Self::Active),
            "retired" => Ok(Self::Retired),
            other => Err(InvalidEnum::new("pattern.status", other)),
        }
    }
}

/// A persisted learned pattern.
#[derive(Debug, Clone)]
pub struct LearnedPattern {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Element combination, e.g. `[{"subject_kind":"question"}, ...]`.
    pub elements: serde_json::Value,
    /// Scoping (persona / relationship / position), when any.
    pub scope: serde_json::Value,
    /// Outreach sample behind the pattern.
    pub sample_size: i64,
    /// Reply-rate lift over the tenant baseline.
    pub lift: f64,
    /// Confidence derived from sample size.
    pub confidence: f64,
    /// Lifecycle status.
    pub status: PatternStatus,
}

/// One element-performance aggregate row to upsert.
#[derive(Debug, Clone)]
pub struct ElementPerformanceRow {
    /// Element type.
    pub element_type: String,
    /// Element value.
    pub element_value: String,
    /// Scope JSON ({} for tenant-wide).
    pub scope: serde_json::Value,
    /// Aggregation period label (e.g. "30d").
    pub period: String,
    /// Number of sends carrying the element.
    pub times_used: i64,
    /// Opens / sends.
    pub open_rate: f64,
    /// Replies / sends.
    pub reply_rate: f64,
    /// Positive replies / sends.
    pub positive_reply_rate: f64,
    /// Bounces / sends.
    pub bounce_rate: f64,
    /// Unsubscribes / sends.
    pub unsubscribe_rate: f64,
    /// Sample-size confidence, saturating around 500.
    pub confidence: f64,
}

impl Store {
    /// Upsert one element-performance aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn upsert_element_performance(
        &self,
        tenant_id: i64,
        row: &ElementPerformanceRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO element_performance (tenant_id, element_type, element_value, scope, \
             period, times_used, open_rate, reply_rate, positive_reply_rate, bounce_rate, \
             unsubscribe_rate, confidence, computed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, datetime('now')) \
             ON CONFLICT(tenant_id, element_type, element_value, scope, period) DO UPDATE SET \
             times_used = excluded.times_used, open_rate = excluded.open_rate, \
             reply_rate = excluded.reply_rate, positive_reply_rate = excluded.positive_reply_rate, \
             bounce_rate = excluded.bounce_rate, unsubscribe_rate = excluded.unsubscribe_rate, \
             confidence = excluded.confidence, computed_at = datetime('now')",
        )
        .bind(tenant_id)
        .bind(&row.element_type)
        .bind(&row.element_value)
        .bind(row.scope.to_string())
        .bind(&row.period)
        .bind(row.times_used)
        .bind(row.open_rate)
        .bind(row.reply_rate)
        .bind(row.positive_reply_rate)
        .bind(row.bounce_rate)
        .bind(row.unsubscribe_rate)
        .bind(row.confidence)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Insert a candidate pattern; returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_pattern(
        &self,
        tenant_id: i64,
        elements: &serde_json::Value,
        scope: &serde_json::Value,
        sample_size: i64,
        lift: f64,
        confidence: f64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO learned_patterns (tenant_id, elements, scope, sample_size, lift, \
             confidence, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'candidate')",
        )
        .bind(tenant_id)
        .bind(elements.to_string())
        .bind(scope.to_string())
        .bind(sample_size)
        .bind(lift)
        .bind(confidence)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Patterns for a tenant, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_patterns(
        &self,
        tenant_id: i64,
        status: Option<PatternStatus>,
    ) -> Result<Vec<LearnedPattern>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM learned_patterns WHERE tenant_id = ?1 AND status = ?2 \
                     ORDER BY id",
                )
                .bind(tenant_id)
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM learned_patterns WHERE tenant_id = ?1 ORDER BY id")
                    .bind(tenant_id)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(pattern_from_row).collect()
    }

    /// Find an existing pattern row with the same elements and scope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn find_pattern(
        &self,
        tenant_id: i64,
        elements: &serde_json::Value,
        scope: &serde_json::Value,
    ) -> Result<Option<LearnedPattern>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM learned_patterns WHERE tenant_id = ?1 AND elements = ?2 AND scope = ?3",
        )
        .bind(tenant_id)
        .bind(elements.to_string())
        .bind(scope.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(pattern_from_row).transpose()
    }

    /// Update a pattern's measured stats and status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn update_pattern(
        &self,
        tenant_id: i64,
        pattern_id: i64,
        sample_size: i64,
        lift: f64,
        confidence: f64,
        status: PatternStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE learned_patterns SET sample_size = ?1, lift = ?2, confidence = ?3, \
             status = ?4, updated_at = datetime('now') WHERE id = ?5 AND tenant_id = ?6",
        )
        .bind(sample_size)
        .bind(lift)
        .bind(confidence)
        .bind(status.as_str())
        .bind(pattern_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Upsert a tenant baseline metric on its natural key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn upsert_baseline(
        &self,
        tenant_id: i64,
        metric_type: &str,
        scope: &str,
        period: &str,
        value: f64,
        sample_size: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO baseline_metrics (tenant_id, metric_type, scope, period, value, \
             sample_size, computed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now')) \
             ON CONFLICT(tenant_id, metric_type, scope, period) DO UPDATE SET \
             value = excluded.value, sample_size = excluded.sample_size, \
             computed_at = datetime('now')",
        )
        .bind(tenant_id)
        .bind(metric_type)
        .bind(scope)
        .bind(period)
        .bind(value)
        .bind(sample_size)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Read a baseline metric value, if computed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_baseline(
        &self,
        tenant_id: i64,
        metric_type: &str,
        scope: &str,
        period: &str,
    ) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(
            "SELECT value FROM baseline_metrics \
             WHERE tenant_id = ?1 AND metric_type = ?2 AND scope = ?3 AND period = ?4",
        )
        .bind(tenant_id)
        .bind(metric_type)
        .bind(scope)
        .bind(period)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| r.try_get("value").map_err(StoreError::from))
            .transpose()
    }
}

fn pattern_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LearnedPattern, StoreError> {
    let status: &str = row.try_get("status")?;
    Ok(LearnedPattern {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        elements: serde_json::from_str(row.try_get("elements")?)?,
        scope: serde_json::from_str(row.try_get("scope")?)?,
        sample_size: row.try_get("sample_size")?,
        lift: row.try_get("lift")?,
        confidence: row.try_get("confidence")?,
        status: PatternStatus::parse(status)?,
    })
}
