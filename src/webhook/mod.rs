//! Webhook edge adapter: provider payloads → internal orchestration
//! events.
//!
//! The HTTP server itself lives outside the core; this module is the
//! conversion layer it calls. Provider ids resolve to lead ids where
//! possible; engagements that cannot be resolved are stored
//! unattributed.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::attribution::{self, EngagementInput};
use crate::providers::{EmailWebhookKind, LinkedInWebhookKind};
use crate::runner::{names, Emitter, RunnerError};
use crate::store::{Store, StoreError};
use crate::types::{Channel, Sentiment};

/// Webhook conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Payload missing required fields or carrying an unknown event.
    #[error("malformed webhook: {0}")]
    Malformed(String),
    /// Store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Queue write failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Convert and enqueue one email-provider webhook. Returns the internal
/// event id, or `None` when the lead could not be resolved (the
/// engagement is stored unattributed instead).
///
/// # Errors
///
/// Returns [`WebhookError::Malformed`] for unknown event names.
pub async fn ingest_email_webhook(
    store: &Store,
    emitter: &Emitter,
    tenant_id: i64,
    payload: &Value,
) -> Result<Option<String>, WebhookError> {
    let kind_raw = payload
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| WebhookError::Malformed("email webhook without event".to_owned()))?;
    let kind = EmailWebhookKind::parse(kind_raw)
        .map_err(|e| WebhookError::Malformed(e.to_string()))?;

    let provider_campaign_id = payload.get("campaign_id").and_then(Value::as_str);
    let provider_lead_id = payload.get("lead_id").and_then(Value::as_str);
    let email = payload.get("email").and_then(Value::as_str);

    let lead_id = resolve_lead(store, tenant_id, email, provider_campaign_id, provider_lead_id)
        .await?;

    let Some(lead_id) = lead_id else {
        warn!(tenant = tenant_id, event = kind_raw, "unresolvable email webhook");
        attribution::record_engagement(
            store,
            &EngagementInput {
                tenant_id,
                lead_id: None,
                event_type: engagement_kind(kind_raw).to_owned(),
                sentiment: parse_sentiment(payload),
                interest_level: payload
                    .get("interest_level")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                provider_campaign_id: provider_campaign_id.map(str::to_owned),
                provider_lead_id: provider_lead_id.map(str::to_owned),
                occurred_at: Utc::now(),
            },
        )
        .await?;
        return Ok(None);
    };

    let event = internal_event(
        tenant_id,
        lead_id,
        kind.event_type(),
        Channel::Email,
        payload,
    );
    let id = emitter.emit(names::ORCHESTRATION_EVENT, &event).await?;
    Ok(Some(id))
}

/// Convert and enqueue one LinkedIn-provider webhook; same contract as
/// [`ingest_email_webhook`].
///
/// # Errors
///
/// Returns [`WebhookError::Malformed`] for unknown event names.
pub async fn ingest_linkedin_webhook(
    store: &Store,
    emitter: &Emitter,
    tenant_id: i64,
    payload: &Value,
) -> Result<Option<String>, WebhookError> {
    let kind_raw = payload
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| WebhookError::Malformed("linkedin webhook without event".to_owned()))?;
    let kind = LinkedInWebhookKind::parse(kind_raw)
        .map_err(|e| WebhookError::Malformed(e.to_string()))?;

    let provider_campaign_id = payload.get("campaign_id").and_then(Value::as_str);
    let provider_lead_id = payload.get("lead_id").and_then(Value::as_str);
    let email = payload.get("email").and_then(Value::as_str);

    let lead_id = resolve_lead(store, tenant_id, email, provider_campaign_id, provider_lead_id)
        .await?;

    let Some(lead_id) = lead_id else {
        warn!(tenant = tenant_id, event = kind_raw, "unresolvable linkedin webhook");
        attribution::record_engagement(
            store,
            &EngagementInput {
                tenant_id,
                lead_id: None,
                event_type: engagement_kind(kind_raw).to_owned(),
                sentiment: parse_sentiment(payload),
                interest_level: None,
                provider_campaign_id: provider_campaign_id.map(str::to_owned),
                provider_lead_id: provider_lead_id.map(str::to_owned),
                occurred_at: Utc::now(),
            },
        )
        .await?;
        return Ok(None);
    };

    let event = internal_event(
        tenant_id,
        lead_id,
        kind.event_type(),
        Channel::Linkedin,
        payload,
    );
    let id = emitter.emit(names::ORCHESTRATION_EVENT, &event).await?;
    Ok(Some(id))
}

/// Resolve a lead id from the webhook's identifiers: by email first,
/// then by (provider campaign, provider lead) outreach lookup.
async fn resolve_lead(
    store: &Store,
    tenant_id: i64,
    email: Option<&str>,
    provider_campaign_id: Option<&str>,
    provider_lead_id: Option<&str>,
) -> Result<Option<i64>, StoreError> {
    if let Some(email) = email {
        if let Some(lead) = store.find_lead_by_email(tenant_id, email).await? {
            return Ok(Some(lead.id));
        }
    }
    if let (Some(campaign), Some(lead)) = (provider_campaign_id, provider_lead_id) {
        if let Some(outreach) = store
            .find_outreach_by_provider(tenant_id, campaign, lead)
            .await?
        {
            return Ok(Some(outreach.lead_id));
        }
    }
    Ok(None)
}

/// Build the internal orchestration-event payload.
pub fn internal_event(
    tenant_id: i64,
    lead_id: i64,
    event_type: &str,
    channel: Channel,
    payload: &Value,
) -> Value {
    let source_event_id = payload
        .get("event_id")
        .and_then(Value::as_str)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
    json!({
        "tenant_id": tenant_id,
        "lead_id": lead_id,
        "event_type": event_type,
        "channel": channel.as_str(),
        "step_number": payload.get("step_number").and_then(Value::as_u64),
        "data": {
            "sentiment": payload.get("sentiment"),
            "interest_level": payload.get("interest_level"),
            "provider_campaign_id": payload.get("campaign_id"),
            "provider_lead_id": payload.get("lead_id"),
        },
        "source_event_id": source_event_id,
    })
}

fn parse_sentiment(payload: &Value) -> Option<Sentiment> {
    payload
        .get("sentiment")
        .and_then(Value::as_str)
        .and_then(|s| Sentiment::parse(s).ok())
}

/// Internal engagement kind for unattributed storage.
fn engagement_kind(webhook_event: &str) -> &'static str {
    match webhook_event {
        "opened" => "open",
        "clicked" => "click",
        "replied" | "inmail_replied" => "reply",
        "bounced" => "bounce",
        "unsubscribed" => "unsubscribe",
        _ => "other",
    }
}
