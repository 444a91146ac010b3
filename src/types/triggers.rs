//! Cross-channel trigger rules and their restricted condition grammar.
//!
//! Conditions are a closed, enumerated set (sentiment equality, integer
//! count bounds, flag presence) so rules stay analyzable and testable.
//! Anything richer is a schema change, not configuration.

use serde::{Deserialize, Serialize};

use super::{Channel, Sentiment};

/// A condition evaluated against the merged post-event state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// The named sentiment field equals the expected value.
    SentimentIs {
        /// "email_reply_sentiment" or "linkedin_reply_sentiment".
        field: String,
        /// Expected sentiment.
        expected: Sentiment,
    },
    /// The named counter is at least `n`.
    CountAtLeast {
        /// Counter field ("email_opened_count", "email_step_current", ...).
        field: String,
        /// Inclusive lower bound.
        n: u32,
    },
    /// The named counter is at most `n`.
    CountAtMost {
        /// Counter field.
        field: String,
        /// Inclusive upper bound.
        n: u32,
    },
    /// The named boolean flag is set.
    FlagSet {
        /// Flag field ("linkedin_connected", "email_replied", ...).
        field: String,
    },
    /// The named boolean flag is clear.
    FlagClear {
        /// Flag field.
        field: String,
    },
}

/// The action a matched trigger applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TriggerAction {
    /// Pause one channel arm.
    Pause {
        /// Channel to pause.
        channel: Channel,
    },
    /// Resume one channel arm.
    Resume {
        /// Channel to resume.
        channel: Channel,
    },
    /// Stop the orchestration.
    Stop {
        /// Stop reason recorded on the state.
        reason: String,
    },
    /// Enter a wait with a timeout.
    Wait {
        /// What the wait is for.
        reason: String,
        /// Upper bound in hours.
        timeout_hours: u32,
    },
    /// Send a specific email step now.
    SendEmail {
        /// 1-based step number.
        step: u32,
    },
    /// Send a specific LinkedIn step now.
    SendLinkedin {
        /// 1-based step number.
        step: u32,
    },
    /// Push conditional-copy variants for remaining steps to the email
    /// provider's custom fields.
    ConditionalCopySync,
    /// Mark the lead converted.
    MarkConverted,
    /// Raise an operator alert.
    Alert {
        /// Alert message.
        message: String,
    },
}

/// A stored cross-channel trigger rule, tenant-scoped or global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossChannelTrigger {
    /// Store row id (0 for built-in defaults).
    pub id: i64,
    /// Owning tenant; `None` means global.
    pub tenant_id: Option<i64>,
    /// Channel the triggering event arrives on.
    pub source_channel: Channel,
    /// Event type the rule listens for.
    pub source_event: String,
    /// All conditions must pass on the post-event state.
    pub conditions: Vec<TriggerCondition>,
    /// Action applied when the rule matches.
    pub target_action: TriggerAction,
    /// Lower number evaluates first.
    pub priority: i64,
}
