//! Sequence persistence and review-attempt idempotency.

use sqlx::Row;

use crate::types::{
    CampaignMode, EmailStep, LinkedInStep, Sequence, SequenceStatus, SequenceStrategy,
};

use super::{Store, StoreError};

/// Fields of a freshly generated sequence, before it has a row id.
#[derive(Debug, Clone)]
pub struct NewSequence {
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead the sequence targets.
    pub lead_id: i64,
    /// Campaign it belongs to.
    pub campaign_id: i64,
    /// Channel mode.
    pub mode: CampaignMode,
    /// Ordered email steps.
    pub email_steps: Vec<EmailStep>,
    /// Ordered LinkedIn steps.
    pub linkedin_steps: Vec<LinkedInStep>,
    /// Generation strategy.
    pub strategy: SequenceStrategy,
    /// Revision attempts already consumed (0 for first generation).
    pub revision_count: u32,
    /// Prompt version that produced the sequence.
    pub prompt_version_id: Option<i64>,
}

impl Store {
    /// Insert a generated sequence in `Pending` review state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_sequence(&self, seq: &NewSequence) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO sequences (tenant_id, lead_id, campaign_id, mode, email_steps, \
             linkedin_steps, strategy, revision_count, status, prompt_version_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)",
        )
        .bind(seq.tenant_id)
        .bind(seq.lead_id)
        .bind(seq.campaign_id)
        .bind(seq.mode.as_str())
        .bind(serde_json::to_string(&seq.email_steps)?)
        .bind(serde_json::to_string(&seq.linkedin_steps)?)
        .bind(serde_json::to_string(&seq.strategy)?)
        .bind(i64::from(seq.revision_count))
        .bind(seq.prompt_version_id)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fetch a sequence by id, scoped to a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such sequence exists.
    pub async fn get_sequence(
        &self,
        tenant_id: i64,
        sequence_id: i64,
    ) -> Result<Sequence, StoreError> {
        let row = sqlx::query("SELECT * FROM sequences WHERE id = ?1 AND tenant_id = ?2")
            .bind(sequence_id)
            .bind(tenant_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "sequence",
                id: sequence_id,
            })?;
        sequence_from_row(&row)
    }

    /// The most recent sequence for a lead, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn latest_sequence_for_lead(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Option<Sequence>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM sequences WHERE tenant_id = ?1 AND lead_id = ?2 \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(sequence_from_row).transpose()
    }

    /// Whether a non-terminal-review sequence already exists for the
    /// (lead, campaign) pair. Guards the one-open-sequence invariant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn has_open_sequence(
        &self,
        tenant_id: i64,
        lead_id: i64,
        campaign_id: i64,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sequences \
             WHERE tenant_id = ?1 AND lead_id = ?2 AND campaign_id = ?3 \
             AND status IN ('pending', 'revising')",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(campaign_id)
        .fetch_one(self.pool())
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    /// Replace a sequence's generated content after a revision and put it
    /// back into `Pending` review.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn update_sequence_content(
        &self,
        tenant_id: i64,
        sequence_id: i64,
        email_steps: &[EmailStep],
        linkedin_steps: &[LinkedInStep],
        strategy: &SequenceStrategy,
        revision_count: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sequences SET email_steps = ?1, linkedin_steps = ?2, strategy = ?3, \
             revision_count = ?4, status = 'pending', updated_at = datetime('now') \
             WHERE id = ?5 AND tenant_id = ?6",
        )
        .bind(serde_json::to_string(email_steps)?)
        .bind(serde_json::to_string(linkedin_steps)?)
        .bind(serde_json::to_string(strategy)?)
        .bind(i64::from(revision_count))
        .bind(sequence_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Persist the reviewer's outcome on the sequence row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn set_sequence_review(
        &self,
        tenant_id: i64,
        sequence_id: i64,
        score: Option<f64>,
        decision: &str,
        status: SequenceStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sequences SET review_score = ?1, review_decision = ?2, status = ?3, \
             updated_at = datetime('now') WHERE id = ?4 AND tenant_id = ?5",
        )
        .bind(score)
        .bind(decision)
        .bind(status.as_str())
        .bind(sequence_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record one review attempt. Returns `false` when the (sequence,
    /// attempt) pair was already recorded — the duplicate is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn record_review_attempt(
        &self,
        tenant_id: i64,
        sequence_id: i64,
        attempt: u32,
        decision: &str,
        score: Option<f64>,
        verdict: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO sequence_reviews \
             (tenant_id, sequence_id, attempt, decision, score, verdict) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(tenant_id)
        .bind(sequence_id)
        .bind(i64::from(attempt))
        .bind(decision)
        .bind(score)
        .bind(verdict.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn sequence_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Sequence, StoreError> {
    let mode: &str = row.try_get("mode")?;
    let status: &str = row.try_get("status")?;
    let revision_count: i64 = row.try_get("revision_count")?;
    Ok(Sequence {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        lead_id: row.try_get("lead_id")?,
        campaign_id: row.try_get("campaign_id")?,
        mode: CampaignMode::parse(mode)?,
        email_steps: serde_json::from_str(row.try_get("email_steps")?)?,
        linkedin_steps: serde_json::from_str(row.try_get("linkedin_steps")?)?,
        strategy: serde_json::from_str(row.try_get("strategy")?)?,
        review_score: row.try_get("review_score")?,
        review_decision: row.try_get("review_decision")?,
        revision_count: u32::try_from(revision_count).unwrap_or(0),
        status: SequenceStatus::parse(status)?,
        prompt_version_id: row.try_get("prompt_version_id")?,
    })
}
