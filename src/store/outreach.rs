//! Outreach and engagement event persistence for attribution.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::types::{Channel, Sentiment};

use super::{parse_ts, ts, Store, StoreError};

/// Fields of a new outreach event (the verbatim content that was sent).
#[derive(Debug, Clone)]
pub struct NewOutreachEvent {
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead contacted.
    pub lead_id: i64,
    /// Sequence in flight.
    pub sequence_id: Option<i64>,
    /// Channel the send went out on.
    pub channel: Channel,
    /// Step number within the sequence.
    pub step_number: u32,
    /// Subject as sent (email only).
    pub subject: Option<String>,
    /// Body as sent.
    pub body: String,
    /// Persona classification at generation time.
    pub persona: Option<String>,
    /// Relationship classification at generation time.
    pub relationship: Option<String>,
    /// Highest-confidence trigger used.
    pub top_trigger: Option<String>,
    /// Strategy snapshot.
    pub strategy: serde_json::Value,
    /// Prompt version that generated the content.
    pub prompt_version_id: Option<i64>,
    /// Provider-side campaign id.
    pub provider_campaign_id: Option<String>,
    /// Provider-side lead id.
    pub provider_lead_id: Option<String>,
    /// Position in the thread (1-based).
    pub thread_position: u32,
    /// Send time.
    pub sent_at: DateTime<Utc>,
}

/// A persisted outreach event.
#[derive(Debug, Clone)]
pub struct OutreachEvent {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead contacted.
    pub lead_id: i64,
    /// Channel.
    pub channel: Channel,
    /// Step number.
    pub step_number: u32,
    /// Subject as sent.
    pub subject: Option<String>,
    /// Body as sent.
    pub body: String,
    /// Persona bucket.
    pub persona: Option<String>,
    /// Relationship bucket.
    pub relationship: Option<String>,
    /// Prompt version id.
    pub prompt_version_id: Option<i64>,
    /// Send time.
    pub sent_at: DateTime<Utc>,
}

/// Fields of a new engagement event.
#[derive(Debug, Clone)]
pub struct NewEngagementEvent {
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead, when resolvable.
    pub lead_id: Option<i64>,
    /// Outreach event this engagement answers, when resolvable.
    pub outreach_event_id: Option<i64>,
    /// Set when the event could not be attributed to an outreach.
    pub unattributed: bool,
    /// Engagement kind ("open", "reply", ...).
    pub event_type: String,
    /// Reply sentiment.
    pub sentiment: Option<Sentiment>,
    /// Interest level ("hot", "warm", "cold").
    pub interest_level: Option<String>,
    /// Days between the lead's first email and this event.
    pub days_since_first_email: Option<i64>,
    /// Provider-side campaign id.
    pub provider_campaign_id: Option<String>,
    /// Provider-side lead id.
    pub provider_lead_id: Option<String>,
    /// When the engagement occurred.
    pub occurred_at: DateTime<Utc>,
}

/// One element tag on an outreach event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementTag {
    /// Element type ("subject_kind", "opener_kind", ...).
    pub element_type: String,
    /// Element value ("question", "trigger_based", ...).
    pub element_value: String,
    /// Position within the email (0 = subject/meta).
    pub position_in_email: u32,
}

impl Store {
    /// Append an outreach event; returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_outreach(&self, event: &NewOutreachEvent) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO outreach_events (tenant_id, lead_id, sequence_id, channel, \
             step_number, subject, body, persona, relationship, top_trigger, strategy, \
             prompt_version_id, provider_campaign_id, provider_lead_id, thread_position, sent_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(event.tenant_id)
        .bind(event.lead_id)
        .bind(event.sequence_id)
        .bind(event.channel.as_str())
        .bind(i64::from(event.step_number))
        .bind(&event.subject)
        .bind(&event.body)
        .bind(&event.persona)
        .bind(&event.relationship)
        .bind(&event.top_trigger)
        .bind(event.strategy.to_string())
        .bind(event.prompt_version_id)
        .bind(&event.provider_campaign_id)
        .bind(&event.provider_lead_id)
        .bind(i64::from(event.thread_position))
        .bind(ts(event.sent_at))
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert element tags for an outreach event. Duplicate
    /// (outreach, element_type, position) rows are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_element_tags(
        &self,
        tenant_id: i64,
        outreach_event_id: i64,
        tags: &[ElementTag],
    ) -> Result<(), StoreError> {
        for tag in tags {
            sqlx::query(
                "INSERT OR IGNORE INTO outreach_element_tags \
                 (tenant_id, outreach_event_id, element_type, element_value, position_in_email) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(tenant_id)
            .bind(outreach_event_id)
            .bind(&tag.element_type)
            .bind(&tag.element_value)
            .bind(i64::from(tag.position_in_email))
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// Resolve an outreach event from provider-side ids, most recent
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn find_outreach_by_provider(
        &self,
        tenant_id: i64,
        provider_campaign_id: &str,
        provider_lead_id: &str,
    ) -> Result<Option<OutreachEvent>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, lead_id, channel, step_number, subject, body, persona, \
             relationship, prompt_version_id, sent_at \
             FROM outreach_events \
             WHERE tenant_id = ?1 AND provider_campaign_id = ?2 AND provider_lead_id = ?3 \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(provider_campaign_id)
        .bind(provider_lead_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(outreach_from_row).transpose()
    }

    /// First email send time for a lead, for `days_since_first_email`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn first_email_sent_at(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            "SELECT MIN(sent_at) AS first_sent FROM outreach_events \
             WHERE tenant_id = ?1 AND lead_id = ?2 AND channel = 'email'",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_one(self.pool())
        .await?;
        let first: Option<String> = row.try_get("first_sent")?;
        first.as_deref().map(|v| parse_ts("sent_at", v)).transpose()
    }

    /// Append an engagement event; returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_engagement(&self, event: &NewEngagementEvent) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO engagement_events (tenant_id, lead_id, outreach_event_id, \
             unattributed, event_type, sentiment, interest_level, days_since_first_email, \
             provider_campaign_id, provider_lead_id, occurred_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(event.tenant_id)
        .bind(event.lead_id)
        .bind(event.outreach_event_id)
        .bind(i64::from(event.unattributed))
        .bind(&event.event_type)
        .bind(event.sentiment.map(|s| s.as_str()))
        .bind(&event.interest_level)
        .bind(event.days_since_first_email)
        .bind(&event.provider_campaign_id)
        .bind(&event.provider_lead_id)
        .bind(ts(event.occurred_at))
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Tagged outreach joined with engagement outcomes over a window.
    /// One row per (outreach, tag); engagement kinds are aggregated per
    /// outreach by the learning loop.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_tagged_outreach_since(
        &self,
        tenant_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<TaggedOutreachRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT o.id AS outreach_id, o.persona, o.relationship, o.step_number, \
             t.element_type, t.element_value, t.position_in_email \
             FROM outreach_events o \
             JOIN outreach_element_tags t ON t.outreach_event_id = o.id \
             WHERE o.tenant_id = ?1 AND o.sent_at >= ?2",
        )
        .bind(tenant_id)
        .bind(ts(since))
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let step: i64 = row.try_get("step_number")?;
                let pos: i64 = row.try_get("position_in_email")?;
                Ok(TaggedOutreachRow {
                    outreach_id: row.try_get("outreach_id")?,
                    persona: row.try_get("persona")?,
                    relationship: row.try_get("relationship")?,
                    step_number: u32::try_from(step).unwrap_or(0),
                    tag: ElementTag {
                        element_type: row.try_get("element_type")?,
                        element_value: row.try_get("element_value")?,
                        position_in_email: u32::try_from(pos).unwrap_or(0),
                    },
                })
            })
            .collect()
    }

    /// Engagement kinds per outreach event over a window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_engagements_since(
        &self,
        tenant_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<EngagementRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT outreach_event_id, event_type, sentiment FROM engagement_events \
             WHERE tenant_id = ?1 AND occurred_at >= ?2 AND outreach_event_id IS NOT NULL",
        )
        .bind(tenant_id)
        .bind(ts(since))
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                let sentiment: Option<&str> = row.try_get("sentiment")?;
                Ok(EngagementRow {
                    outreach_event_id: row.try_get("outreach_event_id")?,
                    event_type: row.try_get("event_type")?,
                    sentiment: sentiment.map(Sentiment::parse).transpose()?,
                })
            })
            .collect()
    }

    /// Per-prompt-version outreach and positive-reply counts since a
    /// cut-off; drives A/B evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn prompt_version_stats(
        &self,
        tenant_id: i64,
        prompt_version_id: i64,
        since: DateTime<Utc>,
    ) -> Result<PromptVersionStats, StoreError> {
        let row = sqlx::query(
            "SELECT \
             (SELECT COUNT(*) FROM outreach_events o \
              WHERE o.tenant_id = ?1 AND o.prompt_version_id = ?2 AND o.sent_at >= ?3) AS sends, \
             (SELECT COUNT(*) FROM engagement_events e \
              JOIN outreach_events o2 ON o2.id = e.outreach_event_id \
              WHERE e.tenant_id = ?1 AND o2.prompt_version_id = ?2 AND e.occurred_at >= ?3 \
              AND (e.event_type = 'positive_reply' OR \
                   (e.event_type = 'reply' AND e.sentiment = 'positive'))) AS positives",
        )
        .bind(tenant_id)
        .bind(prompt_version_id)
        .bind(ts(since))
        .fetch_one(self.pool())
        .await?;
        Ok(PromptVersionStats {
            sends: row.try_get("sends")?,
            positive_replies: row.try_get("positives")?,
        })
    }
}

/// One (outreach, tag) pair from the trailing window.
#[derive(Debug, Clone)]
pub struct TaggedOutreachRow {
    /// Outreach event id.
    pub outreach_id: i64,
    /// Persona bucket.
    pub persona: Option<String>,
    /// Relationship bucket.
    pub relationship: Option<String>,
    /// Step number (email position).
    pub step_number: u32,
    /// The element tag.
    pub tag: ElementTag,
}

/// One engagement row from the trailing window.
#[derive(Debug, Clone)]
pub struct EngagementRow {
    /// Outreach event the engagement resolved to.
    pub outreach_event_id: i64,
    /// Engagement kind.
    pub event_type: String,
    /// Reply sentiment.
    pub sentiment: Option<Sentiment>,
}

/// Aggregate counts for one prompt version.
#[derive(Debug, Clone, Copy)]
pub struct PromptVersionStats {
    /// Outreach sends generated by the version.
    pub sends: i64,
    /// Positive replies among them.
    pub positive_replies: i64,
}

fn outreach_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OutreachEvent, StoreError> {
    let channel: &str = row.try_get("channel")?;
    let step: i64 = row.try_get("step_number")?;
    Ok(OutreachEvent {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        lead_id: row.try_get("lead_id")?,
        channel: Channel::parse(channel)?,
        step_number: u32::try_from(step).unwrap_or(0),
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        persona: row.try_get("persona")?,
        relationship: row.try_get("relationship")?,
        prompt_version_id: row.try_get("prompt_version_id")?,
        sent_at: parse_ts("sent_at", row.try_get("sent_at")?)?,
    })
}
