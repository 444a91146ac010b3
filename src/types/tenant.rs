//! Tenant and brand configuration: the root isolation unit and its ICP.

use serde::{Deserialize, Serialize};

/// Root isolation unit. Everything tenant-specific is fetched from the
/// store; the core holds no per-tenant globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Store row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Registered adapter name for the email arm (e.g. "instantly").
    pub active_email_provider: Option<String>,
    /// Registered adapter name for the LinkedIn arm (e.g. "heyreach").
    pub active_linkedin_provider: Option<String>,
    /// Channels this tenant may deploy to ("email", "linkedin").
    pub enabled_channels: Vec<String>,
    /// Data source kinds this tenant ingests from.
    pub enabled_data_sources: Vec<String>,
    /// Ideal customer profile; brands may override.
    pub icp: Option<IcpProfile>,
    /// Preference weights applied on top of intent scoring.
    pub targeting: Option<TargetingPreferences>,
    /// LLM adapter name (e.g. "anthropic").
    pub llm_provider: Option<String>,
    /// Model identifier passed to the LLM adapter.
    pub llm_model: Option<String>,
    /// Notifier channel for human-review escalations and summaries.
    pub notify_channel: Option<String>,
}

/// Brand: owns campaigns; optionally overrides the tenant ICP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Brand name.
    pub name: String,
    /// Voice and tone guidance fed to generation.
    pub voice: Option<String>,
    /// Value proposition paragraph.
    pub value_proposition: Option<String>,
    /// Differentiator bullet points.
    pub differentiators: Vec<String>,
    /// Brand-scoped ICP; when set it wins over the tenant ICP.
    pub icp: Option<IcpProfile>,
}

impl Brand {
    /// Effective ICP for this brand: the brand override when present,
    /// otherwise the tenant's.
    pub fn effective_icp<'a>(&'a self, tenant: &'a Tenant) -> Option<&'a IcpProfile> {
        self.icp.as_ref().or(tenant.icp.as_ref())
    }
}

/// Ideal customer profile: account criteria, personas, and buying triggers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcpProfile {
    /// Firmographic criteria (industry, employee range, ...).
    #[serde(default)]
    pub account_criteria: Vec<AccountCriterion>,
    /// Target personas.
    #[serde(default)]
    pub personas: Vec<PersonaSpec>,
    /// Textual signals that indicate buying readiness.
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    /// Hard disqualifier rules (titles, industries).
    #[serde(default)]
    pub disqualifiers: Vec<String>,
}

/// One firmographic criterion with its priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCriterion {
    /// Field the criterion applies to ("industry", "employee_count", ...).
    pub field: String,
    /// Accepted values or ranges for the field.
    pub values: Vec<String>,
    /// "high" criteria seed Apollo search synthesis.
    #[serde(default)]
    pub priority: String,
}

/// A persona the tenant sells to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSpec {
    /// Persona label (e.g. "Marketing leader").
    pub name: String,
    /// Job titles matching this persona.
    pub titles: Vec<String>,
    /// Seniority keywords ("vp", "director").
    #[serde(default)]
    pub seniority: Vec<String>,
}

/// A buying-readiness trigger and where to look for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Trigger label (e.g. "recent funding").
    pub name: String,
    /// Research source to search: "personal_linkedin", "company_linkedin",
    /// "web" or "any".
    pub source: String,
    /// Keyword list searched in the source blob.
    pub what_to_look_for: Vec<String>,
    /// Relative impact weight in [0,1].
    #[serde(default = "default_impact")]
    pub impact: f64,
}

fn default_impact() -> f64 {
    0.5
}

/// Preference weights nudging intent scoring per tenant.
///
/// A weight of 1.0 is neutral; above 1.0 adds a fraction of the field's
/// base points, below 1.0 subtracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetingPreferences {
    /// Individual weighted matchers.
    #[serde(default)]
    pub weights: Vec<PreferenceWeight>,
}

/// One weighted matcher over a scored field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceWeight {
    /// Scored field this weight applies to.
    pub field: PreferenceField,
    /// Case-insensitive substring matched against the lead's field value.
    pub matches: String,
    /// Multiplier; 1.0 neutral.
    pub weight: f64,
}

/// Fields that accept targeting-preference weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceField {
    /// Company industry.
    Industry,
    /// Job title.
    Title,
    /// Company revenue band.
    Revenue,
    /// Company employee count band.
    CompanySize,
}
