//! Email delivery port and the Instantly adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use url::Url;

use crate::types::InvalidEnum;

use super::{check_http_response, ProviderError, PROVIDER_TIMEOUT};

/// Webhook event kinds an email provider may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailWebhookKind {
    /// Email sent.
    Sent,
    /// Email opened (counts increment).
    Opened,
    /// Link clicked.
    Clicked,
    /// Lead replied.
    Replied,
    /// Delivery bounced.
    Bounced,
    /// Lead unsubscribed.
    Unsubscribed,
}

impl EmailWebhookKind {
    /// Internal orchestration event type for this webhook kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Sent => "email_sent",
            Self::Opened => "email_opened",
            Self::Clicked => "email_clicked",
            Self::Replied => "email_replied",
            Self::Bounced => "email_bounced",
            Self::Unsubscribed => "email_unsubscribed",
        }
    }

    /// Parse a provider webhook event name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised names.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "sent" => Ok(Self::Sent),
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            "replied" => Ok(Self::Replied),
            "bounced" => Ok(Self::Bounced),
            "unsubscribed" => Ok(Self::Unsubscribed),
            other => Err(InvalidEnum::new("email_webhook", other)),
        }
    }
}

/// Lead fields pushed to the email provider.
#[derive(Debug, Clone)]
pub struct EmailLead {
    /// Email address.
    pub email: String,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Company name.
    pub company_name: Option<String>,
}

/// A reply fetched from the provider's inbox.
#[derive(Debug, Clone)]
pub struct ReceivedReply {
    /// Provider campaign id the reply belongs to.
    pub provider_campaign_id: String,
    /// Provider lead id.
    pub provider_lead_id: String,
    /// Reply body text.
    pub body: String,
    /// When the reply arrived.
    pub received_at: DateTime<Utc>,
}

/// Email delivery port.
///
/// Step bodies travel as custom fields so the provider holds schedules;
/// conditional-copy swaps update those fields in place.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Add a lead to a provider-side campaign with templated custom
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn add_lead_to_campaign(
        &self,
        campaign_id: &str,
        lead: &EmailLead,
        custom_fields: &Value,
    ) -> Result<(), ProviderError>;

    /// Replace a lead's custom fields (conditional-copy sync).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn update_lead_custom_fields(
        &self,
        campaign_id: &str,
        email: &str,
        custom_fields: &Value,
    ) -> Result<(), ProviderError>;

    /// Pause all sending to a lead.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn pause_lead(&self, campaign_id: &str, email: &str) -> Result<(), ProviderError>;

    /// Replies received since `since`, optionally scoped to one campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn fetch_received_replies(
        &self,
        since: DateTime<Utc>,
        campaign_id: Option<&str>,
    ) -> Result<Vec<ReceivedReply>, ProviderError>;
}

impl std::fmt::Debug for dyn EmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn EmailSender").finish()
    }
}

/// Instantly HTTP adapter.
#[derive(Debug, Clone)]
pub struct InstantlyClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl InstantlyClient {
    /// Create an adapter with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.instantly.ai/api/v2".to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint (tests point at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        // Url::join drops the last segment without a trailing slash.
        let base = if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        };
        Url::parse(&base)
            .and_then(|base| base.join(path))
            .map_err(|e| ProviderError::Parse(format!("bad endpoint {path}: {e}")))
    }
}

#[async_trait]
impl EmailSender for InstantlyClient {
    async fn add_lead_to_campaign(
        &self,
        campaign_id: &str,
        lead: &EmailLead,
        custom_fields: &Value,
    ) -> Result<(), ProviderError> {
        let url = self.endpoint("leads")?;
        let body = json!({
            "campaign_id": campaign_id,
            "email": lead.email,
            "first_name": lead.first_name,
            "last_name": lead.last_name,
            "company_name": lead.company_name,
            "custom_variables": custom_fields,
        });
        let response = self
            .client
            .post(url)
            .timeout(PROVIDER_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }

    async fn update_lead_custom_fields(
        &self,
        campaign_id: &str,
        email: &str,
        custom_fields: &Value,
    ) -> Result<(), ProviderError> {
        let url = self.endpoint("leads/update")?;
        let body = json!({
            "campaign_id": campaign_id,
            "email": email,
            "custom_variables": custom_fields,
        });
        let response = self
            .client
            .post(url)
            .timeout(PROVIDER_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }

    async fn pause_lead(&self, campaign_id: &str, email: &str) -> Result<(), ProviderError> {
        let url = self.endpoint("leads/pause")?;
        let body = json!({"campaign_id": campaign_id, "email": email});
        let response = self
            .client
            .post(url)
            .timeout(PROVIDER_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }

    async fn fetch_received_replies(
        &self,
        since: DateTime<Utc>,
        campaign_id: Option<&str>,
    ) -> Result<Vec<ReceivedReply>, ProviderError> {
        let mut url = self.endpoint("emails/replies")?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_rfc3339());
        if let Some(campaign) = campaign_id {
            url.query_pairs_mut().append_pair("campaign_id", campaign);
        }
        let response = self
            .client
            .get(url)
            .timeout(PROVIDER_TIMEOUT)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;
        parse_replies(&parsed)
    }
}

/// Parse the replies payload. Pure, for testability.
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] when the payload shape is unexpected.
pub fn parse_replies(parsed: &Value) -> Result<Vec<ReceivedReply>, ProviderError> {
    let items = parsed
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Parse("missing items array".to_owned()))?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let received_at = item
                .get("received_at")
                .and_then(Value::as_str)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|v| v.with_timezone(&Utc))?;
            Some(ReceivedReply {
                provider_campaign_id: item.get("campaign_id")?.as_str()?.to_owned(),
                provider_lead_id: item.get("lead_id")?.as_str()?.to_owned(),
                body: item
                    .get("body")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                received_at,
            })
        })
        .collect())
}
