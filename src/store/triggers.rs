//! Cross-channel trigger rule access.

use sqlx::Row;

use crate::types::{Channel, CrossChannelTrigger};

use super::{Store, StoreError};

impl Store {
    /// Enabled trigger rules matching (source channel, source event) for a
    /// tenant, including global rules, priority-ordered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_triggers(
        &self,
        tenant_id: i64,
        source_channel: Channel,
        source_event: &str,
    ) -> Result<Vec<CrossChannelTrigger>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM cross_channel_triggers \
             WHERE (tenant_id = ?1 OR tenant_id IS NULL) AND source_channel = ?2 \
             AND source_event = ?3 AND enabled = 1 \
             ORDER BY priority, id",
        )
        .bind(tenant_id)
        .bind(source_channel.as_str())
        .bind(source_event)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let channel: &str = row.try_get("source_channel")?;
                Ok(CrossChannelTrigger {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    source_channel: Channel::parse(channel)?,
                    source_event: row.try_get("source_event")?,
                    conditions: serde_json::from_str(row.try_get("conditions")?)?,
                    target_action: serde_json::from_str(row.try_get("target_action")?)?,
                    priority: row.try_get("priority")?,
                })
            })
            .collect()
    }

    /// Insert a trigger rule (tenant-scoped, or global when `tenant_id`
    /// is `None`). Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_trigger(&self, rule: &CrossChannelTrigger) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO cross_channel_triggers \
             (tenant_id, source_channel, source_event, conditions, target_action, priority) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(rule.tenant_id)
        .bind(rule.source_channel.as_str())
        .bind(&rule.source_event)
        .bind(serde_json::to_string(&rule.conditions)?)
        .bind(serde_json::to_string(&rule.target_action)?)
        .bind(rule.priority)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }
}
