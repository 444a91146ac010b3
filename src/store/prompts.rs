//! Prompt versions and A/B tests.
//!
//! Exactly one version per (tenant, prompt name) is `active` at a time;
//! activation deactivates the incumbent in the same transaction.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::types::InvalidEnum;

use super::{parse_ts, Store, StoreError};

/// Prompt version lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVersionStatus {
    /// Candidate under A/B test.
    Testing,
    /// The live version for its prompt name.
    Active,
    /// Replaced or lost its test.
    Deprecated,
}

impl PromptVersionStatus {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Testing => "testing",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "testing" => Ok(Self::Testing),
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(InvalidEnum::new("prompt_version.status", other)),
        }
    }
}

/// One stored prompt version.
#[derive(Debug, Clone)]
pub struct PromptVersion {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Prompt name ("sequence-writer", "reviewer", "qualification").
    pub prompt_name: String,
    /// Monotonic version number per (tenant, name).
    pub version: i64,
    /// Full prompt text.
    pub body: String,
    /// Lifecycle status.
    pub status: PromptVersionStatus,
    /// Pattern ids embedded in the body.
    pub injected_patterns: Vec<i64>,
}

/// One running or concluded prompt A/B test.
#[derive(Debug, Clone)]
pub struct PromptAbTest {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Prompt name under test.
    pub prompt_name: String,
    /// Control (current-active) version id.
    pub control_version_id: i64,
    /// Variant (testing) version id.
    pub variant_version_id: i64,
    /// Percentage of draws routed to the variant.
    pub split_percent: i64,
    /// Per-arm sample size required to conclude.
    pub min_sample_per_variant: i64,
    /// Wall-clock cap on the test.
    pub max_runtime_days: i64,
    /// "running" or "concluded".
    pub status: String,
    /// Winner version id once concluded.
    pub winner_version_id: Option<i64>,
    /// Test start time.
    pub started_at: DateTime<Utc>,
}

impl Store {
    /// The active version for (tenant, prompt name), if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn active_prompt_version(
        &self,
        tenant_id: i64,
        prompt_name: &str,
    ) -> Result<Option<PromptVersion>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM prompt_versions \
             WHERE tenant_id = ?1 AND prompt_name = ?2 AND status = 'active' \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(prompt_name)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    /// Fetch a prompt version by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such version exists.
    pub async fn get_prompt_version(
        &self,
        tenant_id: i64,
        version_id: i64,
    ) -> Result<PromptVersion, StoreError> {
        let row = sqlx::query("SELECT * FROM prompt_versions WHERE id = ?1 AND tenant_id = ?2")
            .bind(version_id)
            .bind(tenant_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "prompt_version",
                id: version_id,
            })?;
        version_from_row(&row)
    }

    /// Insert the next version for (tenant, prompt name) with the given
    /// status. The version number is allocated from the current maximum.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_prompt_version(
        &self,
        tenant_id: i64,
        prompt_name: &str,
        body: &str,
        status: PromptVersionStatus,
        injected_patterns: &[i64],
    ) -> Result<PromptVersion, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS v FROM prompt_versions \
             WHERE tenant_id = ?1 AND prompt_name = ?2",
        )
        .bind(tenant_id)
        .bind(prompt_name)
        .fetch_one(self.pool())
        .await?;
        let current: i64 = row.try_get("v")?;
        let next = current.saturating_add(1);

        let result = sqlx::query(
            "INSERT INTO prompt_versions \
             (tenant_id, prompt_name, version, body, status, injected_patterns) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(tenant_id)
        .bind(prompt_name)
        .bind(next)
        .bind(body)
        .bind(status.as_str())
        .bind(serde_json::to_string(injected_patterns)?)
        .execute(self.pool())
        .await?;

        self.get_prompt_version(tenant_id, result.last_insert_rowid())
            .await
    }

    /// Activate a version: the incumbent active version (if any) is
    /// deprecated and the new one activated in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn activate_prompt_version(
        &self,
        tenant_id: i64,
        prompt_name: &str,
        version_id: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "UPDATE prompt_versions SET status = 'deprecated' \
             WHERE tenant_id = ?1 AND prompt_name = ?2 AND status = 'active' AND id != ?3",
        )
        .bind(tenant_id)
        .bind(prompt_name)
        .bind(version_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE prompt_versions SET status = 'active' WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(version_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Mark a version deprecated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn deprecate_prompt_version(
        &self,
        tenant_id: i64,
        version_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE prompt_versions SET status = 'deprecated' WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(version_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Create a 50/50 A/B test between a control and a variant version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn create_ab_test(
        &self,
        tenant_id: i64,
        prompt_name: &str,
        control_version_id: i64,
        variant_version_id: i64,
        min_sample_per_variant: i64,
        max_runtime_days: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO prompt_ab_tests (tenant_id, prompt_name, control_version_id, \
             variant_version_id, split_percent, min_sample_per_variant, max_runtime_days) \
             VALUES (?1, ?2, ?3, ?4, 50, ?5, ?6)",
        )
        .bind(tenant_id)
        .bind(prompt_name)
        .bind(control_version_id)
        .bind(variant_version_id)
        .bind(min_sample_per_variant)
        .bind(max_runtime_days)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The running A/B test for (tenant, prompt name), if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn running_ab_test(
        &self,
        tenant_id: i64,
        prompt_name: &str,
    ) -> Result<Option<PromptAbTest>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM prompt_ab_tests \
             WHERE tenant_id = ?1 AND prompt_name = ?2 AND status = 'running' \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(prompt_name)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(ab_test_from_row).transpose()
    }

    /// All running A/B tests for a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_running_ab_tests(
        &self,
        tenant_id: i64,
    ) -> Result<Vec<PromptAbTest>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM prompt_ab_tests WHERE tenant_id = ?1 AND status = 'running' \
             ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(ab_test_from_row).collect()
    }

    /// Conclude an A/B test with an optional winner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn conclude_ab_test(
        &self,
        tenant_id: i64,
        test_id: i64,
        winner_version_id: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE prompt_ab_tests SET status = 'concluded', winner_version_id = ?1, \
             concluded_at = datetime('now') WHERE id = ?2 AND tenant_id = ?3",
        )
        .bind(winner_version_id)
        .bind(test_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn version_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PromptVersion, StoreError> {
    let status: &str = row.try_get("status")?;
    Ok(PromptVersion {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        prompt_name: row.try_get("prompt_name")?,
        version: row.try_get("version")?,
        body: row.try_get("body")?,
        status: PromptVersionStatus::parse(status)?,
        injected_patterns: serde_json::from_str(row.try_get("injected_patterns")?)?,
    })
}

fn ab_test_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PromptAbTest, StoreError> {
    Ok(PromptAbTest {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        prompt_name: row.try_get("prompt_name")?,
        control_version_id: row.try_get("control_version_id")?,
        variant_version_id: row.try_get("variant_version_id")?,
        split_percent: row.try_get("split_percent")?,
        min_sample_per_variant: row.try_get("min_sample_per_variant")?,
        max_runtime_days: row.try_get("max_runtime_days")?,
        status: row.try_get("status")?,
        winner_version_id: row.try_get("winner_version_id")?,
        started_at: parse_ts("started_at", row.try_get("started_at")?)?,
    })
}
