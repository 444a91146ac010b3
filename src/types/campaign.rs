//! Campaign configuration and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InvalidEnum;

/// Campaign lifecycle status. Ingestion only occurs while `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Being configured; not yet runnable.
    Draft,
    /// Ingesting and deploying.
    Active,
    /// Temporarily halted; observed at handler entry.
    Paused,
    /// Finished; terminal.
    Completed,
}

impl CampaignStatus {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            other => Err(InvalidEnum::new("campaign.status", other)),
        }
    }
}

/// Which channels the campaign deploys to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignMode {
    /// Email steps only.
    EmailOnly,
    /// LinkedIn steps only.
    LinkedinOnly,
    /// Coordinated email + LinkedIn.
    MultiChannel,
}

impl CampaignMode {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailOnly => "email_only",
            Self::LinkedinOnly => "linkedin_only",
            Self::MultiChannel => "multi_channel",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "email_only" => Ok(Self::EmailOnly),
            "linkedin_only" => Ok(Self::LinkedinOnly),
            "multi_channel" => Ok(Self::MultiChannel),
            other => Err(InvalidEnum::new("campaign.mode", other)),
        }
    }

    /// Whether the mode includes the email arm.
    pub fn has_email(&self) -> bool {
        matches!(self, Self::EmailOnly | Self::MultiChannel)
    }

    /// Whether the mode includes the LinkedIn arm.
    pub fn has_linkedin(&self) -> bool {
        matches!(self, Self::LinkedinOnly | Self::MultiChannel)
    }
}

/// Where a campaign's leads come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// Tracking-pixel visitor feed.
    Pixel,
    /// Third-party intent feed.
    Intent,
    /// Prospect-database search.
    Apollo,
    /// CSV upload / manual entry — no-op at ingestion time.
    Manual,
}

impl DataSourceKind {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pixel => "pixel",
            Self::Intent => "intent",
            Self::Apollo => "apollo",
            Self::Manual => "manual",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "pixel" => Ok(Self::Pixel),
            "intent" => Ok(Self::Intent),
            "apollo" => Ok(Self::Apollo),
            "manual" => Ok(Self::Manual),
            other => Err(InvalidEnum::new("campaign.data_source_kind", other)),
        }
    }
}

/// A configured outbound campaign, pinned to a tenant, owned by a brand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Owning brand.
    pub brand_id: i64,
    /// Campaign name.
    pub name: String,
    /// Lifecycle status.
    pub status: CampaignStatus,
    /// Channel mode.
    pub mode: CampaignMode,
    /// Lead source kind.
    pub data_source_kind: DataSourceKind,
    /// Opaque source configuration (endpoint, credentials reference, ...).
    pub data_source_config: serde_json::Value,
    /// Number of email steps to generate.
    pub email_step_count: u32,
    /// Number of LinkedIn steps to generate.
    pub linkedin_step_count: u32,
    /// Hold messaging until the connection request is accepted.
    pub wait_for_connection: bool,
    /// How long to wait for a connection before resuming.
    pub connection_timeout_hours: u32,
    /// Open with LinkedIn instead of email.
    pub linkedin_first: bool,
    /// Free-form generation instructions from the campaign owner.
    pub custom_instructions: Option<String>,
    /// Counter: leads ingested.
    pub leads_ingested: i64,
    /// Counter: leads contacted.
    pub leads_contacted: i64,
    /// Counter: leads that replied.
    pub leads_replied: i64,
    /// Counter: leads converted.
    pub leads_converted: i64,
    /// Last successful ingestion time.
    pub last_ingested_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Whether this campaign may ingest and deploy right now.
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}
