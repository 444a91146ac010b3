//! Tenant, brand, and saved-search access.

use sqlx::Row;

use crate::types::{Brand, IcpProfile, TargetingPreferences, Tenant};

use super::{Store, StoreError};

impl Store {
    /// Fetch a tenant by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such tenant exists.
    pub async fn get_tenant(&self, tenant_id: i64) -> Result<Tenant, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, active_email_provider, active_linkedin_provider, \
             enabled_channels, enabled_data_sources, icp, targeting, llm_provider, \
             llm_model, notify_channel \
             FROM tenants WHERE id = ?1",
        )
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound {
            entity: "tenant",
            id: tenant_id,
        })?;
        tenant_from_row(&row)
    }

    /// All tenants, for the learning cron fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, active_email_provider, active_linkedin_provider, \
             enabled_channels, enabled_data_sources, icp, targeting, llm_provider, \
             llm_model, notify_channel \
             FROM tenants ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    /// Tenants whose `enabled_data_sources` JSON array contains `kind`.
    /// SQLite has no native array-contains, so this matches the quoted
    /// element inside the serialized array.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_tenants_with_data_source(
        &self,
        kind: &str,
    ) -> Result<Vec<Tenant>, StoreError> {
        let needle = format!("%\"{kind}\"%");
        let rows = sqlx::query(
            "SELECT id, name, active_email_provider, active_linkedin_provider, \
             enabled_channels, enabled_data_sources, icp, targeting, llm_provider, \
             llm_model, notify_channel \
             FROM tenants WHERE enabled_data_sources LIKE ?1 ORDER BY id",
        )
        .bind(needle)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    /// Fetch a brand by id, scoped to a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such brand exists.
    pub async fn get_brand(&self, tenant_id: i64, brand_id: i64) -> Result<Brand, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, voice, value_proposition, differentiators, icp \
             FROM brands WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(brand_id)
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound {
            entity: "brand",
            id: brand_id,
        })?;

        Ok(Brand {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            voice: row.try_get("voice")?,
            value_proposition: row.try_get("value_proposition")?,
            differentiators: serde_json::from_str(row.try_get("differentiators")?)?,
            icp: parse_json_opt(row.try_get("icp")?)?,
        })
    }

    /// Rolled-up tenant activity counts since a cut-off, for the daily
    /// summary notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn tenant_activity_since(
        &self,
        tenant_id: i64,
        since: &str,
    ) -> Result<TenantActivity, StoreError> {
        let row = sqlx::query(
            "SELECT \
             (SELECT COUNT(*) FROM leads WHERE tenant_id = ?1 AND created_at >= ?2) AS leads, \
             (SELECT COUNT(*) FROM outreach_events WHERE tenant_id = ?1 AND sent_at >= ?2) AS sends, \
             (SELECT COUNT(*) FROM engagement_events WHERE tenant_id = ?1 \
              AND occurred_at >= ?2 AND event_type IN ('reply', 'positive_reply')) AS replies",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(self.pool())
        .await?;
        Ok(TenantActivity {
            leads_ingested: row.try_get("leads")?,
            outreach_sent: row.try_get("sends")?,
            replies: row.try_get("replies")?,
        })
    }

    /// Saved prospect-search parameters by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such search exists.
    pub async fn get_saved_search(
        &self,
        tenant_id: i64,
        search_id: i64,
    ) -> Result<serde_json::Value, StoreError> {
        let row = sqlx::query("SELECT params FROM saved_searches WHERE id = ?1 AND tenant_id = ?2")
            .bind(search_id)
            .bind(tenant_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "saved_search",
                id: search_id,
            })?;
        let params: String = row.try_get("params")?;
        Ok(serde_json::from_str(&params)?)
    }
}

/// Daily-summary counts for one tenant.
#[derive(Debug, Clone, Copy)]
pub struct TenantActivity {
    /// Leads ingested in the window.
    pub leads_ingested: i64,
    /// Outreach sends in the window.
    pub outreach_sent: i64,
    /// Replies in the window.
    pub replies: i64,
}

fn tenant_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant, StoreError> {
    let icp: Option<IcpProfile> = parse_json_opt(row.try_get("icp")?)?;
    let targeting: Option<TargetingPreferences> = parse_json_opt(row.try_get("targeting")?)?;
    Ok(Tenant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        active_email_provider: row.try_get("active_email_provider")?,
        active_linkedin_provider: row.try_get("active_linkedin_provider")?,
        enabled_channels: serde_json::from_str(row.try_get("enabled_channels")?)?,
        enabled_data_sources: serde_json::from_str(row.try_get("enabled_data_sources")?)?,
        icp,
        targeting,
        llm_provider: row.try_get("llm_provider")?,
        llm_model: row.try_get("llm_model")?,
        notify_channel: row.try_get("notify_channel")?,
    })
}

fn parse_json_opt<T: serde::de::DeserializeOwned>(
    value: Option<&str>,
) -> Result<Option<T>, StoreError> {
    value
        .map(serde_json::from_str)
        .transpose()
        .map_err(StoreError::from)
}
