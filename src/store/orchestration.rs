//! Orchestration state and append-only event log access.

use sqlx::Row;

use crate::types::{
    orchestration::{ChannelArm, CrossChannelSignals},
    CampaignMode, Channel, OrchestrationEventRow, OrchestrationState, OrchestrationStatus,
    Sentiment,
};

use super::{parse_ts_opt, ts, Store, StoreError};

/// Fields of a new orchestration event row (id assigned on append).
#[derive(Debug, Clone)]
pub struct NewOrchestrationEvent {
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead the event belongs to.
    pub lead_id: i64,
    /// Sequence in flight.
    pub sequence_id: Option<i64>,
    /// Event type string.
    pub event_type: String,
    /// Channel the event arrived on.
    pub channel: Channel,
    /// Step number, 0 when not applicable.
    pub step_number: u32,
    /// Opaque event data.
    pub data: serde_json::Value,
    /// Decision taken by the orchestrator.
    pub decision: Option<String>,
    /// Reason string.
    pub reason: Option<String>,
    /// External event id; part of the exactly-once key.
    pub source_event_id: String,
}

impl Store {
    /// Create the orchestration state for a lead unless one already
    /// exists. Returns the state and whether it was created — at most one
    /// OrchestrationState ever exists per lead.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn create_orchestration_if_absent(
        &self,
        tenant_id: i64,
        lead_id: i64,
        sequence_id: i64,
        campaign_id: i64,
        mode: CampaignMode,
        email_total: u32,
        linkedin_total: u32,
    ) -> Result<(OrchestrationState, bool), StoreError> {
        let insert = sqlx::query(
            "INSERT INTO orchestration_states \
             (tenant_id, lead_id, sequence_id, campaign_id, mode, \
              email_step_total, linkedin_step_total) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(sequence_id)
        .bind(campaign_id)
        .bind(mode.as_str())
        .bind(i64::from(email_total))
        .bind(i64::from(linkedin_total))
        .execute(self.pool())
        .await;

        let created = match insert {
            Ok(_) => true,
            Err(err) if StoreError::is_unique_violation(&err) => false,
            Err(err) => return Err(err.into()),
        };

        let state = self
            .get_orchestration_by_lead(tenant_id, lead_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "orchestration_state",
                id: lead_id,
            })?;
        Ok((state, created))
    }

    /// Fetch the orchestration state for a lead, if deployed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_orchestration_by_lead(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Option<OrchestrationState>, StoreError> {
        let row =
            sqlx::query("SELECT * FROM orchestration_states WHERE tenant_id = ?1 AND lead_id = ?2")
                .bind(tenant_id)
                .bind(lead_id)
                .fetch_optional(self.pool())
                .await?;
        row.as_ref().map(state_from_row).transpose()
    }

    /// Persist a mutated orchestration state under optimistic locking.
    /// The caller's `state.version` must match the stored row; the write
    /// bumps it by one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the version check fails.
    pub async fn save_orchestration(&self, state: &OrchestrationState) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orchestration_states SET \
             email_step_current = ?1, email_step_total = ?2, email_started = ?3, \
             email_paused = ?4, email_completed = ?5, last_email_sent_at = ?6, \
             next_email_scheduled_at = ?7, \
             linkedin_step_current = ?8, linkedin_step_total = ?9, linkedin_started = ?10, \
             linkedin_paused = ?11, linkedin_completed = ?12, last_linkedin_sent_at = ?13, \
             next_linkedin_scheduled_at = ?14, \
             linkedin_connected = ?15, linkedin_connected_at = ?16, linkedin_replied = ?17, \
             linkedin_reply_sentiment = ?18, email_opened = ?19, email_opened_count = ?20, \
             email_clicked = ?21, email_replied = ?22, email_reply_sentiment = ?23, \
             status = ?24, waiting_for = ?25, waiting_since = ?26, waiting_timeout_at = ?27, \
             stop_reason = ?28, version = version + 1, updated_at = datetime('now') \
             WHERE id = ?29 AND version = ?30",
        )
        .bind(i64::from(state.email.step_current))
        .bind(i64::from(state.email.step_total))
        .bind(i64::from(state.email.started))
        .bind(i64::from(state.email.paused))
        .bind(i64::from(state.email.completed))
        .bind(state.email.last_sent_at.map(ts))
        .bind(state.email.next_scheduled_at.map(ts))
        .bind(i64::from(state.linkedin.step_current))
        .bind(i64::from(state.linkedin.step_total))
        .bind(i64::from(state.linkedin.started))
        .bind(i64::from(state.linkedin.paused))
        .bind(i64::from(state.linkedin.completed))
        .bind(state.linkedin.last_sent_at.map(ts))
        .bind(state.linkedin.next_scheduled_at.map(ts))
        .bind(i64::from(state.signals.linkedin_connected))
        .bind(state.signals.linkedin_connected_at.map(ts))
        .bind(i64::from(state.signals.linkedin_replied))
        .bind(state.signals.linkedin_reply_sentiment.map(|s| s.as_str()))
        .bind(i64::from(state.signals.email_opened))
        .bind(i64::from(state.signals.email_opened_count))
        .bind(i64::from(state.signals.email_clicked))
        .bind(i64::from(state.signals.email_replied))
        .bind(state.signals.email_reply_sentiment.map(|s| s.as_str()))
        .bind(state.status.as_str())
        .bind(&state.waiting_for)
        .bind(state.waiting_since.map(ts))
        .bind(state.waiting_timeout_at.map(ts))
        .bind(&state.stop_reason)
        .bind(state.id)
        .bind(state.version)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                entity: "orchestration_state",
            });
        }
        Ok(())
    }

    /// Apply one event outcome atomically: the incoming event row, the
    /// optimistic state save, and the decision rows commit together.
    ///
    /// Returns `false` without writing anything when the incoming row's
    /// (lead, event_type, step, source_event) key already exists — the
    /// at-least-once duplicate is dropped before any side effect runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the state version check
    /// fails (the transaction rolls back).
    pub async fn apply_orchestration_outcome(
        &self,
        state: &OrchestrationState,
        incoming: &NewOrchestrationEvent,
        decisions: &[NewOrchestrationEvent],
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO orchestration_events \
             (tenant_id, lead_id, sequence_id, event_type, channel, step_number, \
              data, decision, reason, source_event_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(incoming.tenant_id)
        .bind(incoming.lead_id)
        .bind(incoming.sequence_id)
        .bind(&incoming.event_type)
        .bind(incoming.channel.as_str())
        .bind(i64::from(incoming.step_number))
        .bind(incoming.data.to_string())
        .bind(&incoming.decision)
        .bind(&incoming.reason)
        .bind(&incoming.source_event_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let saved = sqlx::query(
            "UPDATE orchestration_states SET \
             email_step_current = ?1, email_step_total = ?2, email_started = ?3, \
             email_paused = ?4, email_completed = ?5, last_email_sent_at = ?6, \
             next_email_scheduled_at = ?7, \
             linkedin_step_current = ?8, linkedin_step_total = ?9, linkedin_started = ?10, \
             linkedin_paused = ?11, linkedin_completed = ?12, last_linkedin_sent_at = ?13, \
             next_linkedin_scheduled_at = ?14, \
             linkedin_connected = ?15, linkedin_connected_at = ?16, linkedin_replied = ?17, \
             linkedin_reply_sentiment = ?18, email_opened = ?19, email_opened_count = ?20, \
             email_clicked = ?21, email_replied = ?22, email_reply_sentiment = ?23, \
             status = ?24, waiting_for = ?25, waiting_since = ?26, waiting_timeout_at = ?27, \
             stop_reason = ?28, version = version + 1, updated_at = datetime('now') \
             WHERE id = ?29 AND version = ?30",
        )
        .bind(i64::from(state.email.step_current))
        .bind(i64::from(state.email.step_total))
        .bind(i64::from(state.email.started))
        .bind(i64::from(state.email.paused))
        .bind(i64::from(state.email.completed))
        .bind(state.email.last_sent_at.map(ts))
        .bind(state.email.next_scheduled_at.map(ts))
        .bind(i64::from(state.linkedin.step_current))
        .bind(i64::from(state.linkedin.step_total))
        .bind(i64::from(state.linkedin.started))
        .bind(i64::from(state.linkedin.paused))
        .bind(i64::from(state.linkedin.completed))
        .bind(state.linkedin.last_sent_at.map(ts))
        .bind(state.linkedin.next_scheduled_at.map(ts))
        .bind(i64::from(state.signals.linkedin_connected))
        .bind(state.signals.linkedin_connected_at.map(ts))
        .bind(i64::from(state.signals.linkedin_replied))
        .bind(state.signals.linkedin_reply_sentiment.map(|s| s.as_str()))
        .bind(i64::from(state.signals.email_opened))
        .bind(i64::from(state.signals.email_opened_count))
        .bind(i64::from(state.signals.email_clicked))
        .bind(i64::from(state.signals.email_replied))
        .bind(state.signals.email_reply_sentiment.map(|s| s.as_str()))
        .bind(state.status.as_str())
        .bind(&state.waiting_for)
        .bind(state.waiting_since.map(ts))
        .bind(state.waiting_timeout_at.map(ts))
        .bind(&state.stop_reason)
        .bind(state.id)
        .bind(state.version)
        .execute(&mut *tx)
        .await?;
        if saved.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Conflict {
                entity: "orchestration_state",
            });
        }

        for event in decisions {
            sqlx::query(
                "INSERT OR IGNORE INTO orchestration_events \
                 (tenant_id, lead_id, sequence_id, event_type, channel, step_number, \
                  data, decision, reason, source_event_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(event.tenant_id)
            .bind(event.lead_id)
            .bind(event.sequence_id)
            .bind(&event.event_type)
            .bind(event.channel.as_str())
            .bind(i64::from(event.step_number))
            .bind(event.data.to_string())
            .bind(&event.decision)
            .bind(&event.reason)
            .bind(&event.source_event_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Append an orchestration event. Returns `false` when the
    /// (lead, event_type, step, source_event) key was already present —
    /// the at-least-once duplicate is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn append_orchestration_event(
        &self,
        event: &NewOrchestrationEvent,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO orchestration_events \
             (tenant_id, lead_id, sequence_id, event_type, channel, step_number, \
              data, decision, reason, source_event_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(event.tenant_id)
        .bind(event.lead_id)
        .bind(event.sequence_id)
        .bind(&event.event_type)
        .bind(event.channel.as_str())
        .bind(i64::from(event.step_number))
        .bind(event.data.to_string())
        .bind(&event.decision)
        .bind(&event.reason)
        .bind(&event.source_event_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Orchestration events for a lead, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_orchestration_events(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Vec<OrchestrationEventRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM orchestration_events WHERE tenant_id = ?1 AND lead_id = ?2 \
             ORDER BY id",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let channel: &str = row.try_get("channel")?;
                let step: i64 = row.try_get("step_number")?;
                let data: &str = row.try_get("data")?;
                Ok(OrchestrationEventRow {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    lead_id: row.try_get("lead_id")?,
                    sequence_id: row.try_get("sequence_id")?,
                    event_type: row.try_get("event_type")?,
                    channel: Channel::parse(channel)?,
                    step_number: u32::try_from(step).unwrap_or(0),
                    data: serde_json::from_str(data)?,
                    decision: row.try_get("decision")?,
                    reason: row.try_get("reason")?,
                    source_event_id: row.try_get("source_event_id")?,
                })
            })
            .collect()
    }
}

fn state_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OrchestrationState, StoreError> {
    let mode: &str = row.try_get("mode")?;
    let status: &str = row.try_get("status")?;
    let li_sentiment: Option<&str> = row.try_get("linkedin_reply_sentiment")?;
    let em_sentiment: Option<&str> = row.try_get("email_reply_sentiment")?;

    let arm = |prefix: &str| -> Result<ChannelArm, StoreError> {
        let get_i64 = |col: &str| -> Result<i64, StoreError> {
            row.try_get::<i64, _>(format!("{prefix}_{col}").as_str())
                .map_err(StoreError::from)
        };
        Ok(ChannelArm {
            step_current: u32::try_from(get_i64("step_current")?).unwrap_or(0),
            step_total: u32::try_from(get_i64("step_total")?).unwrap_or(0),
            started: get_i64("started")? != 0,
            paused: get_i64("paused")? != 0,
            completed: get_i64("completed")? != 0,
            last_sent_at: None,
            next_scheduled_at: None,
        })
    };

    let mut email = arm("email")?;
    email.last_sent_at = parse_ts_opt("last_email_sent_at", row.try_get("last_email_sent_at")?)?;
    email.next_scheduled_at = parse_ts_opt(
        "next_email_scheduled_at",
        row.try_get("next_email_scheduled_at")?,
    )?;
    let mut linkedin = arm("linkedin")?;
    linkedin.last_sent_at = parse_ts_opt(
        "last_linkedin_sent_at",
        row.try_get("last_linkedin_sent_at")?,
    )?;
    linkedin.next_scheduled_at = parse_ts_opt(
        "next_linkedin_scheduled_at",
        row.try_get("next_linkedin_scheduled_at")?,
    )?;

    let opened_count: i64 = row.try_get("email_opened_count")?;
    Ok(OrchestrationState {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        lead_id: row.try_get("lead_id")?,
        sequence_id: row.try_get("sequence_id")?,
        campaign_id: row.try_get("campaign_id")?,
        mode: CampaignMode::parse(mode)?,
        email,
        linkedin,
        signals: CrossChannelSignals {
            linkedin_connected: row.try_get::<i64, _>("linkedin_connected")? != 0,
            linkedin_connected_at: parse_ts_opt(
                "linkedin_connected_at",
                row.try_get("linkedin_connected_at")?,
            )?,
            linkedin_replied: row.try_get::<i64, _>("linkedin_replied")? != 0,
            linkedin_reply_sentiment: li_sentiment.map(Sentiment::parse).transpose()?,
            email_opened: row.try_get::<i64, _>("email_opened")? != 0,
            email_opened_count: u32::try_from(opened_count).unwrap_or(0),
            email_clicked: row.try_get::<i64, _>("email_clicked")? != 0,
            email_replied: row.try_get::<i64, _>("email_replied")? != 0,
            email_reply_sentiment: em_sentiment.map(Sentiment::parse).transpose()?,
        },
        status: OrchestrationStatus::parse(status)?,
        waiting_for: row.try_get("waiting_for")?,
        waiting_since: parse_ts_opt("waiting_since", row.try_get("waiting_since")?)?,
        waiting_timeout_at: parse_ts_opt("waiting_timeout_at", row.try_get("waiting_timeout_at")?)?,
        stop_reason: row.try_get("stop_reason")?,
        version: row.try_get("version")?,
    })
}
