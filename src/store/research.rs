//! Research record persistence.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use crate::research::ContextProfile;

use super::{parse_ts, ts, Store, StoreError};

/// A persisted research record: raw per-source blobs plus the extracted
/// structured profile.
#[derive(Debug, Clone)]
pub struct ResearchRecord {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// The lead (1:1).
    pub lead_id: i64,
    /// Opaque raw blobs keyed by source name.
    pub raw_sources: serde_json::Value,
    /// Extracted context profile.
    pub profile: ContextProfile,
    /// Which sources succeeded in the waterfall.
    pub waterfall_summary: serde_json::Value,
    /// When the research was gathered.
    pub fetched_at: DateTime<Utc>,
}

impl ResearchRecord {
    /// Whether the record is fresh enough to reuse (cut-off 30 days).
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.fetched_at) < Duration::days(30)
    }
}

impl Store {
    /// Fetch the research record for a lead, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_research(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Option<ResearchRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, lead_id, raw_sources, profile, waterfall_summary, fetched_at \
             FROM research_records WHERE tenant_id = ?1 AND lead_id = ?2",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            Ok(ResearchRecord {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                lead_id: row.try_get("lead_id")?,
                raw_sources: serde_json::from_str(row.try_get("raw_sources")?)?,
                profile: serde_json::from_str(row.try_get("profile")?)?,
                waterfall_summary: serde_json::from_str(row.try_get("waterfall_summary")?)?,
                fetched_at: parse_ts("fetched_at", row.try_get("fetched_at")?)?,
            })
        })
        .transpose()
    }

    /// Insert or replace the research record for a lead.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn upsert_research(
        &self,
        tenant_id: i64,
        lead_id: i64,
        raw_sources: &serde_json::Value,
        profile: &ContextProfile,
        waterfall_summary: &serde_json::Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO research_records \
             (tenant_id, lead_id, raw_sources, profile, waterfall_summary, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(lead_id) DO UPDATE SET \
             raw_sources = excluded.raw_sources, profile = excluded.profile, \
             waterfall_summary = excluded.waterfall_summary, fetched_at = excluded.fetched_at",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(raw_sources.to_string())
        .bind(serde_json::to_string(profile)?)
        .bind(waterfall_summary.to_string())
        .bind(ts(fetched_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
