//! LinkedIn automation port and the HeyReach adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use crate::types::InvalidEnum;

use super::{check_http_response, ProviderError, PROVIDER_TIMEOUT};

/// Webhook event kinds a LinkedIn provider may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedInWebhookKind {
    /// Connection request sent.
    ConnectionSent,
    /// Connection accepted.
    Connected,
    /// Message sent.
    MessageSent,
    /// Lead replied to a message.
    Replied,
    /// Lead replied to an InMail.
    InmailReplied,
    /// Lead liked a post.
    PostLiked,
    /// Profile viewed.
    ProfileViewed,
    /// Follow sent.
    FollowSent,
    /// Provider-side campaign finished.
    CampaignCompleted,
    /// Lead tags updated.
    TagUpdated,
}

impl LinkedInWebhookKind {
    /// Internal orchestration event type for this webhook kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionSent => "linkedin_connection_sent",
            Self::Connected => "linkedin_connected",
            Self::MessageSent => "linkedin_message_sent",
            Self::Replied => "linkedin_replied",
            Self::InmailReplied => "linkedin_inmail_replied",
            Self::PostLiked => "linkedin_post_liked",
            Self::ProfileViewed => "linkedin_profile_viewed",
            Self::FollowSent => "linkedin_follow_sent",
            Self::CampaignCompleted => "linkedin_campaign_completed",
            Self::TagUpdated => "linkedin_tag_updated",
        }
    }

    /// Parse a provider webhook event name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised names.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "connection_sent" => Ok(Self::ConnectionSent),
            "connected" => Ok(Self::Connected),
            "message_sent" => Ok(Self::MessageSent),
            "replied" => Ok(Self::Replied),
            "inmail_replied" => Ok(Self::InmailReplied),
            "post_liked" => Ok(Self::PostLiked),
            "profile_viewed" => Ok(Self::ProfileViewed),
            "follow_sent" => Ok(Self::FollowSent),
            "campaign_completed" => Ok(Self::CampaignCompleted),
            "tag_updated" => Ok(Self::TagUpdated),
            other => Err(InvalidEnum::new("linkedin_webhook", other)),
        }
    }
}

/// LinkedIn automation port.
#[async_trait]
pub trait LinkedInAutomation: Send + Sync {
    /// Add a lead (by profile URL) to a provider-side campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn add_lead_to_campaign(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        custom_fields: &Value,
    ) -> Result<(), ProviderError>;

    /// Send a direct message to a connected lead.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn send_message(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        body: &str,
    ) -> Result<(), ProviderError>;

    /// Replace a lead's tags.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn update_tags(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        tags: &[String],
    ) -> Result<(), ProviderError>;
}

impl std::fmt::Debug for dyn LinkedInAutomation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn LinkedInAutomation").finish()
    }
}

/// HeyReach HTTP adapter.
#[derive(Debug, Clone)]
pub struct HeyReachClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl HeyReachClient {
    /// Create an adapter with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.heyreach.io/api/public".to_owned(),
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

    async fn post(&self, path: &str, body: &Value) -> Result<(), ProviderError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .timeout(PROVIDER_TIMEOUT)
            .header("X-API-KEY", &self.api_key)
            .json(body)
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl LinkedInAutomation for HeyReachClient {
    async fn add_lead_to_campaign(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        custom_fields: &Value,
    ) -> Result<(), ProviderError> {
        self.post(
            "campaigns/add-leads",
            &json!({
                "campaign_id": campaign_id,
                "profile_url": linkedin_url,
                "custom_fields": custom_fields,
            }),
        )
        .await
    }

    async fn send_message(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        body: &str,
    ) -> Result<(), ProviderError> {
        self.post(
            "messages/send",
            &json!({
                "campaign_id": campaign_id,
                "profile_url": linkedin_url,
                "message": body,
            }),
        )
        .await
    }

    async fn update_tags(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        tags: &[String],
    ) -> Result<(), ProviderError> {
        self.post(
            "leads/tags",
            &json!({
                "campaign_id": campaign_id,
                "profile_url": linkedin_url,
                "tags": tags,
            }),
        )
        .await
    }
}
