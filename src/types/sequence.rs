//! Generated sequences: ordered email and LinkedIn steps plus strategy.

use serde::{Deserialize, Serialize};

use super::InvalidEnum;

/// Review lifecycle of a generated sequence. At most one sequence per
/// (lead, campaign) may sit in a non-terminal review state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    /// Generated, awaiting review.
    Pending,
    /// Reviewer approved; deployable.
    Approved,
    /// Sent back for revision.
    Revising,
    /// Escalated to a human; terminal for automation.
    HumanReview,
    /// Rejected; terminal.
    Rejected,
}

impl SequenceStatus {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Revising => "revising",
            Self::HumanReview => "human_review",
            Self::Rejected => "rejected",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "revising" => Ok(Self::Revising),
            "human_review" => Ok(Self::HumanReview),
            "rejected" => Ok(Self::Rejected),
            other => Err(InvalidEnum::new("sequence.status", other)),
        }
    }

    /// Whether the review loop is finished for this sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::HumanReview | Self::Rejected)
    }
}

/// Email step archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStepType {
    /// Opening email.
    Initial,
    /// Value-add follow-up.
    ValueAdd,
    /// Short bump.
    Bump,
    /// Case-study proof point.
    CaseStudy,
    /// Referral ask.
    Referral,
}

/// LinkedIn step archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkedInStepType {
    /// Connection request with note.
    ConnectionRequest,
    /// Direct message (requires connection).
    Message,
    /// InMail (no connection required).
    Inmail,
    /// Profile view touch.
    ViewProfile,
    /// Like a recent post.
    Like,
    /// Follow the person.
    Follow,
}

/// Cross-channel wait declared on a step: hold until `event` arrives or
/// `timeout_hours` elapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitSpec {
    /// Event name to wait for (e.g. "linkedin_connected").
    pub event: String,
    /// Upper bound on the wait.
    pub timeout_hours: u32,
}

/// One email touch in a sequence.
///
/// Conditional-copy variants are generated up front so the orchestrator
/// can swap at send time without regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailStep {
    /// 1-based step number.
    pub step_number: u32,
    /// Scheduled day offset from sequence start.
    pub day: u32,
    /// Step archetype.
    pub step_type: EmailStepType,
    /// Subject line.
    pub subject: String,
    /// Base body.
    pub body: String,
    /// Variant used once the LinkedIn connection is accepted.
    #[serde(default)]
    pub body_linkedin_connected: Option<String>,
    /// Variant used once the lead replied on LinkedIn.
    #[serde(default)]
    pub body_linkedin_replied: Option<String>,
    /// Word count of the base body.
    #[serde(default)]
    pub word_count: u32,
    /// LinkedIn step to fire when this email sends.
    #[serde(default)]
    pub trigger_linkedin: Option<u32>,
    /// Hold this email for a LinkedIn event.
    #[serde(default)]
    pub wait_for_linkedin: Option<WaitSpec>,
}

/// One LinkedIn touch in a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedInStep {
    /// 1-based step number.
    pub step_number: u32,
    /// Scheduled day offset from sequence start.
    pub day: u32,
    /// Step archetype.
    pub step_type: LinkedInStepType,
    /// Connection-request note (may use personalization variables).
    #[serde(default)]
    pub connection_note: Option<String>,
    /// Fallback note without personalization variables. Required whenever
    /// `connection_note` uses variables.
    #[serde(default)]
    pub connection_note_fallback: Option<String>,
    /// Base message body.
    #[serde(default)]
    pub body: Option<String>,
    /// Fallback body without personalization variables.
    #[serde(default)]
    pub body_fallback: Option<String>,
    /// Variant used once any email was opened.
    #[serde(default)]
    pub body_email_opened: Option<String>,
    /// Variant used once the lead replied by email.
    #[serde(default)]
    pub body_email_replied: Option<String>,
    /// Step cannot send before the connection is accepted.
    #[serde(default)]
    pub requires_connection: bool,
    /// Email step to fire when this step sends.
    #[serde(default)]
    pub trigger_email: Option<u32>,
    /// Hold this step for an email event.
    #[serde(default)]
    pub wait_for_email: Option<WaitSpec>,
}

/// Generation strategy captured alongside the steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceStrategy {
    /// Primary messaging angle.
    #[serde(default)]
    pub primary_angle: String,
    /// Cross-channel trigger notes from the generator.
    #[serde(default)]
    pub cross_channel_triggers: Vec<String>,
    /// Tone ("direct", "warm", ...).
    #[serde(default)]
    pub tone: String,
    /// Open with LinkedIn instead of email.
    #[serde(default)]
    pub linkedin_first: bool,
    /// Hold messaging until the connection is accepted.
    #[serde(default)]
    pub wait_for_connection: bool,
    /// Connection wait upper bound.
    #[serde(default)]
    pub connection_timeout_hours: u32,
}

/// A generated sequence for one lead in one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead this sequence targets.
    pub lead_id: i64,
    /// Campaign the sequence belongs to.
    pub campaign_id: i64,
    /// Channel mode inherited from the campaign.
    pub mode: super::CampaignMode,
    /// Ordered email steps.
    pub email_steps: Vec<EmailStep>,
    /// Ordered LinkedIn steps.
    pub linkedin_steps: Vec<LinkedInStep>,
    /// Generation strategy.
    pub strategy: SequenceStrategy,
    /// Reviewer's overall score, once reviewed.
    pub review_score: Option<f64>,
    /// Reviewer's decision string, once reviewed.
    pub review_decision: Option<String>,
    /// Revision attempts consumed (capped at 3).
    pub revision_count: u32,
    /// Review lifecycle status.
    pub status: SequenceStatus,
    /// Prompt version that generated this sequence.
    pub prompt_version_id: Option<i64>,
}

/// Hard cap on reviewer-driven revisions before human escalation.
pub const MAX_REVISION_ATTEMPTS: u32 = 3;
