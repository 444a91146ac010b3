//! Attribution: outreach capture and engagement resolution.
//!
//! Every outbound send persists the verbatim content with auto-assigned
//! element tags; every engagement resolves back to its outreach, or is
//! stored unattributed — never dropped.

pub mod tagger;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::store::outreach::{NewEngagementEvent, NewOutreachEvent};
use crate::store::{Store, StoreError};
use crate::types::{Channel, Sentiment};

/// Capture one outbound send: the outreach row plus element tags.
///
/// # Errors
///
/// Returns [`StoreError`] on persistence failure.
pub async fn record_outreach(store: &Store, event: &NewOutreachEvent) -> Result<i64, StoreError> {
    let outreach_id = store.insert_outreach(event).await?;
    if event.channel == Channel::Email {
        let tags = tagger::tag_email(event.subject.as_deref(), &event.body);
        store
            .insert_element_tags(event.tenant_id, outreach_id, &tags)
            .await?;
    }
    debug!(
        outreach = outreach_id,
        lead = event.lead_id,
        channel = event.channel.as_str(),
        "outreach recorded"
    );
    Ok(outreach_id)
}

/// Engagement details arriving from a provider webhook.
#[derive(Debug, Clone)]
pub struct EngagementInput {
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead, when the edge already resolved it.
    pub lead_id: Option<i64>,
    /// Engagement kind ("open", "reply", "positive_reply", ...).
    pub event_type: String,
    /// Reply sentiment.
    pub sentiment: Option<Sentiment>,
    /// Interest level.
    pub interest_level: Option<String>,
    /// Provider-side campaign id.
    pub provider_campaign_id: Option<String>,
    /// Provider-side lead id.
    pub provider_lead_id: Option<String>,
    /// When the engagement occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Record one engagement, resolving it to an outreach event when the
/// provider ids allow; otherwise it is stored with `unattributed = true`.
///
/// # Errors
///
/// Returns [`StoreError`] on persistence failure.
pub async fn record_engagement(store: &Store, input: &EngagementInput) -> Result<i64, StoreError> {
    let outreach = match (&input.provider_campaign_id, &input.provider_lead_id) {
        (Some(campaign), Some(lead)) => {
            store
                .find_outreach_by_provider(input.tenant_id, campaign, lead)
                .await?
        }
        _ => None,
    };

    let lead_id = input.lead_id.or(outreach.as_ref().map(|o| o.lead_id));
    let unattributed = outreach.is_none();
    if unattributed {
        warn!(
            tenant = input.tenant_id,
            event = %input.event_type,
            "engagement could not be attributed to an outreach"
        );
    }

    let days_since_first_email = match lead_id {
        Some(lead_id) => store
            .first_email_sent_at(input.tenant_id, lead_id)
            .await?
            .map(|first| input.occurred_at.signed_duration_since(first).num_days()),
        None => None,
    };

    store
        .insert_engagement(&NewEngagementEvent {
            tenant_id: input.tenant_id,
            lead_id,
            outreach_event_id: outreach.as_ref().map(|o| o.id),
            unattributed,
            event_type: input.event_type.clone(),
            sentiment: input.sentiment,
            interest_level: input.interest_level.clone(),
            days_since_first_email,
            provider_campaign_id: input.provider_campaign_id.clone(),
            provider_lead_id: input.provider_lead_id.clone(),
            occurred_at: input.occurred_at,
        })
        .await
}
