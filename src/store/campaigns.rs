//! Campaign access and counters.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::types::{Campaign, CampaignMode, CampaignStatus, DataSourceKind};

use super::{parse_ts_opt, ts, Store, StoreError};

/// Campaign counters bumped atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignCounter {
    /// Leads ingested.
    Ingested,
    /// Leads contacted (first send).
    Contacted,
    /// Leads that replied.
    Replied,
    /// Leads converted.
    Converted,
}

impl CampaignCounter {
    fn column(&self) -> &'static str {
        match self {
            Self::Ingested => "leads_ingested",
            Self::Contacted => "leads_contacted",
            Self::Replied => "leads_replied",
            Self::Converted => "leads_converted",
        }
    }
}

impl Store {
    /// Fetch a campaign by id, scoped to a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such campaign exists.
    pub async fn get_campaign(
        &self,
        tenant_id: i64,
        campaign_id: i64,
    ) -> Result<Campaign, StoreError> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?1 AND tenant_id = ?2")
            .bind(campaign_id)
            .bind(tenant_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "campaign",
                id: campaign_id,
            })?;
        campaign_from_row(&row)
    }

    /// Active campaigns pulling from a given data source, across tenants.
    /// Used by the daily ingestion fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_active_campaigns_by_source(
        &self,
        kind: DataSourceKind,
    ) -> Result<Vec<Campaign>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM campaigns WHERE status = 'active' AND data_source_kind = ?1 \
             ORDER BY id",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(campaign_from_row).collect()
    }

    /// Atomically bump a campaign counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn increment_campaign_counter(
        &self,
        tenant_id: i64,
        campaign_id: i64,
        counter: CampaignCounter,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE campaigns SET {col} = {col} + 1 WHERE id = ?1 AND tenant_id = ?2",
            col = counter.column()
        );
        sqlx::query(&sql)
            .bind(campaign_id)
            .bind(tenant_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record the outcome of an ingestion run. A failed run keeps the
    /// campaign active but surfaces the error on its next read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn set_last_ingested(
        &self,
        tenant_id: i64,
        campaign_id: i64,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE campaigns SET last_ingested_at = ?1, last_ingest_error = ?2 \
             WHERE id = ?3 AND tenant_id = ?4",
        )
        .bind(ts(at))
        .bind(error)
        .bind(campaign_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Campaign, StoreError> {
    let status: &str = row.try_get("status")?;
    let mode: &str = row.try_get("mode")?;
    let kind: &str = row.try_get("data_source_kind")?;
    let config: &str = row.try_get("data_source_config")?;
    let email_steps: i64 = row.try_get("email_step_count")?;
    let linkedin_steps: i64 = row.try_get("linkedin_step_count")?;
    let timeout: i64 = row.try_get("connection_timeout_hours")?;
    Ok(Campaign {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        brand_id: row.try_get("brand_id")?,
        name: row.try_get("name")?,
        status: CampaignStatus::parse(status)?,
        mode: CampaignMode::parse(mode)?,
        data_source_kind: DataSourceKind::parse(kind)?,
        data_source_config: serde_json::from_str(config)?,
        email_step_count: u32::try_from(email_steps).unwrap_or(0),
        linkedin_step_count: u32::try_from(linkedin_steps).unwrap_or(0),
        wait_for_connection: row.try_get::<i64, _>("wait_for_connection")? != 0,
        connection_timeout_hours: u32::try_from(timeout).unwrap_or(72),
        linkedin_first: row.try_get::<i64, _>("linkedin_first")? != 0,
        custom_instructions: row.try_get("custom_instructions")?,
        leads_ingested: row.try_get("leads_ingested")?,
        leads_contacted: row.try_get("leads_contacted")?,
        leads_replied: row.try_get("leads_replied")?,
        leads_converted: row.try_get("leads_converted")?,
        last_ingested_at: parse_ts_opt("last_ingested_at", row.try_get("last_ingested_at")?)?,
    })
}
