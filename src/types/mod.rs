//! Canonical domain model shared by every stage.
//!
//! Shapes are strongly typed; untyped JSON is confined to raw provider
//! blobs and extension-point metadata. Enums stored in SQLite carry
//! `as_str()` / `parse()` codec pairs so the store never round-trips
//! plain text columns through serde.

pub mod campaign;
pub mod lead;
pub mod orchestration;
pub mod sequence;
pub mod tenant;
pub mod triggers;

pub use campaign::{Campaign, CampaignMode, CampaignStatus, DataSourceKind};
pub use lead::{Lead, LeadSource, LeadStatus, NormalizedLead, QualificationDecision};
pub use orchestration::{
    Channel, OrchestrationEventRow, OrchestrationState, OrchestrationStatus, Sentiment,
};
pub use sequence::{
    EmailStep, EmailStepType, LinkedInStep, LinkedInStepType, Sequence, SequenceStatus,
    SequenceStrategy, WaitSpec,
};
pub use tenant::{
    AccountCriterion, Brand, IcpProfile, PersonaSpec, TargetingPreferences, Tenant, TriggerSpec,
};
pub use triggers::{CrossChannelTrigger, TriggerAction, TriggerCondition};

use thiserror::Error;

/// Text-enum codec failure coming out of the store.
#[derive(Debug, Error)]
#[error("invalid {field} value: {value}")]
pub struct InvalidEnum {
    /// Column or field name.
    pub field: &'static str,
    /// The offending stored value.
    pub value: String,
}

impl InvalidEnum {
    pub(crate) fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_owned(),
        }
    }
}
