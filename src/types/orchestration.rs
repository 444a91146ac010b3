//! Per-lead cross-channel orchestration state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CampaignMode, InvalidEnum};

/// Delivery channel of a step or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Email arm.
    Email,
    /// LinkedIn arm.
    Linkedin,
    /// Internal orchestrator events (timers, starts). Skipped by
    /// cross-channel trigger evaluation.
    Orchestrator,
}

impl Channel {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Linkedin => "linkedin",
            Self::Orchestrator => "orchestrator",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "email" => Ok(Self::Email),
            "linkedin" => Ok(Self::Linkedin),
            "orchestrator" => Ok(Self::Orchestrator),
            other => Err(InvalidEnum::new("channel", other)),
        }
    }
}

/// Reply sentiment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// Interested / positive.
    Positive,
    /// Neutral or ambiguous.
    Neutral,
    /// Not interested / negative.
    Negative,
}

impl Sentiment {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            other => Err(InvalidEnum::new("sentiment", other)),
        }
    }

    /// Positive or neutral.
    pub fn is_non_negative(&self) -> bool {
        !matches!(self, Self::Negative)
    }
}

/// Top-level orchestration status.
///
/// Terminal states: `Stopped`, `Converted`, `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    /// Created, not yet deployed.
    Pending,
    /// Delivering.
    Active,
    /// Both-or-either arm paused by an action.
    Paused,
    /// Holding for a cross-channel event with a timeout armed.
    Waiting,
    /// Both channels exhausted without a stop; terminal.
    Completed,
    /// Stopped with a reason; terminal.
    Stopped,
    /// Marked converted; terminal.
    Converted,
}

impl OrchestrationStatus {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Converted => "converted",
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
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "converted" => Ok(Self::Converted),
            other => Err(InvalidEnum::new("orchestration.status", other)),
        }
    }

    /// No further events are applied once terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Converted)
    }
}

/// Progress and pause flags for one channel arm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelArm {
    /// Steps already sent.
    pub step_current: u32,
    /// Total steps deployed for this arm.
    pub step_total: u32,
    /// Whether the arm has started sending.
    pub started: bool,
    /// Whether the arm is paused.
    pub paused: bool,
    /// Whether the arm exhausted its steps.
    pub completed: bool,
    /// Last send time.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Next scheduled send time, when the orchestrator owns the timer.
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

impl ChannelArm {
    /// Whether every step of the arm has been sent.
    pub fn exhausted(&self) -> bool {
        self.step_total > 0 && self.step_current >= self.step_total
    }
}

/// Cross-channel signals accumulated from engagement events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossChannelSignals {
    /// LinkedIn connection accepted.
    pub linkedin_connected: bool,
    /// When the connection was accepted.
    pub linkedin_connected_at: Option<DateTime<Utc>>,
    /// Lead replied on LinkedIn.
    pub linkedin_replied: bool,
    /// Sentiment of the LinkedIn reply.
    pub linkedin_reply_sentiment: Option<Sentiment>,
    /// Any email was opened.
    pub email_opened: bool,
    /// Total email opens.
    pub email_opened_count: u32,
    /// Any email link was clicked.
    pub email_clicked: bool,
    /// Lead replied by email.
    pub email_replied: bool,
    /// Sentiment of the email reply.
    pub email_reply_sentiment: Option<Sentiment>,
}

/// The per-lead orchestration state machine row. Exists iff a sequence has
/// been approved for the lead; at most one per lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// The lead (unique).
    pub lead_id: i64,
    /// The approved sequence being delivered.
    pub sequence_id: i64,
    /// Campaign the deployment belongs to.
    pub campaign_id: i64,
    /// Channel mode.
    pub mode: CampaignMode,
    /// Email arm progress.
    pub email: ChannelArm,
    /// LinkedIn arm progress.
    pub linkedin: ChannelArm,
    /// Accumulated cross-channel signals.
    pub signals: CrossChannelSignals,
    /// Top-level status.
    pub status: OrchestrationStatus,
    /// What the state machine is waiting for, when `Waiting`.
    pub waiting_for: Option<String>,
    /// When the wait began.
    pub waiting_since: Option<DateTime<Utc>>,
    /// Hard deadline; a timer delivers `waiting_timeout` at or after it.
    pub waiting_timeout_at: Option<DateTime<Utc>>,
    /// Why the orchestration stopped, when `Stopped`.
    pub stop_reason: Option<String>,
    /// Optimistic-lock row version.
    pub version: i64,
}

impl OrchestrationState {
    /// Arm accessor by channel. `Orchestrator` maps to the email arm only
    /// for counters that do not exist there; callers pass real channels.
    pub fn arm(&self, channel: Channel) -> &ChannelArm {
        match channel {
            Channel::Email | Channel::Orchestrator => &self.email,
            Channel::Linkedin => &self.linkedin,
        }
    }

    /// Mutable arm accessor by channel.
    pub fn arm_mut(&mut self, channel: Channel) -> &mut ChannelArm {
        match channel {
            Channel::Email | Channel::Orchestrator => &mut self.email,
            Channel::Linkedin => &mut self.linkedin,
        }
    }

    /// Whether the mode's termination rule is satisfied: every deployed
    /// arm has exhausted its steps.
    pub fn all_channels_exhausted(&self) -> bool {
        let email_done = !self.mode.has_email() || self.email.exhausted();
        let linkedin_done = !self.mode.has_linkedin() || self.linkedin.exhausted();
        email_done && linkedin_done
    }
}

/// One appended orchestration event row: the audit and attribution source
/// of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEventRow {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Lead the event belongs to.
    pub lead_id: i64,
    /// Sequence in flight, when known.
    pub sequence_id: Option<i64>,
    /// Event type string ("email_opened", "cross_channel_trigger", ...).
    pub event_type: String,
    /// Channel the event arrived on.
    pub channel: Channel,
    /// Step number when applicable, else 0.
    pub step_number: u32,
    /// Opaque event data.
    pub data: serde_json::Value,
    /// Decision the orchestrator took.
    pub decision: Option<String>,
    /// Human-readable reason for the decision.
    pub reason: Option<String>,
    /// Id of the external event that produced this row; part of the
    /// exactly-once uniqueness key.
    pub source_event_id: String,
}
