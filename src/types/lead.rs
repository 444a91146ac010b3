//! Leads: the unit of work flowing through every stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InvalidEnum;

/// Where a lead record came from.
///
/// Sources are ordered by trust: a lead's stored source is only ever
/// upgraded along `pixel > intent > apollo > manual`, never downgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadSource {
    /// First-party tracking pixel — a real visitor.
    Pixel,
    /// Third-party intent feed.
    Intent,
    /// Prospect-database search.
    Apollo,
    /// CSV upload / manual entry.
    Manual,
}

impl LeadSource {
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
            other => Err(InvalidEnum::new("lead.source", other)),
        }
    }

    /// Priority for source upgrades (higher wins).
    pub fn priority(&self) -> u8 {
        match self {
            Self::Pixel => 4,
            Self::Intent => 3,
            Self::Apollo => 2,
            Self::Manual => 1,
        }
    }

    /// The stored source after seeing this lead again from `incoming`.
    /// Upgrades only; never downgrades.
    pub fn upgraded(self, incoming: LeadSource) -> LeadSource {
        if incoming.priority() > self.priority() {
            incoming
        } else {
            self
        }
    }
}

/// Lead lifecycle status. Mutated only by stage handlers; leads are never
/// deleted on the core path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Inserted by the normalizer; awaiting qualification.
    Ingested,
    /// Parked for a human decision.
    HumanReview,
    /// Qualifier said NO; never deployed.
    Disqualified,
    /// Qualified YES; research complete or underway.
    Researched,
    /// Sequence approved and ready to deploy.
    SequenceReady,
    /// Orchestration running.
    Active,
    /// Got a reply.
    Replied,
    /// Sequence exhausted without engagement.
    Cold,
    /// Marked converted.
    Converted,
}

impl LeadStatus {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::HumanReview => "human_review",
            Self::Disqualified => "disqualified",
            Self::Researched => "researched",
            Self::SequenceReady => "sequence_ready",
            Self::Active => "active",
            Self::Replied => "replied",
            Self::Cold => "cold",
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
            "ingested" => Ok(Self::Ingested),
            "human_review" => Ok(Self::HumanReview),
            "disqualified" => Ok(Self::Disqualified),
            "researched" => Ok(Self::Researched),
            "sequence_ready" => Ok(Self::SequenceReady),
            "active" => Ok(Self::Active),
            "replied" => Ok(Self::Replied),
            "cold" => Ok(Self::Cold),
            "converted" => Ok(Self::Converted),
            other => Err(InvalidEnum::new("lead.status", other)),
        }
    }

    /// Legal successor statuses. Used by the transition invariant tests
    /// and asserted (as a warning) by the store on status writes.
    pub fn allowed_next(&self) -> &'static [LeadStatus] {
        match self {
            Self::Ingested => &[
                Self::HumanReview,
                Self::Disqualified,
                Self::Researched,
                Self::Ingested,
            ],
            Self::HumanReview => &[Self::Researched, Self::Disqualified, Self::HumanReview],
            Self::Disqualified => &[],
            Self::Researched => &[Self::SequenceReady, Self::HumanReview, Self::Researched],
            Self::SequenceReady => &[Self::Active, Self::HumanReview],
            Self::Active => &[Self::Replied, Self::Cold, Self::Converted, Self::Active],
            Self::Replied => &[Self::Converted, Self::Replied],
            Self::Cold => &[Self::Active, Self::Cold],
            Self::Converted => &[],
        }
    }
}

/// The qualifier's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualificationDecision {
    /// Deploy.
    Yes,
    /// Disqualify.
    No,
    /// Park for a human.
    Review,
}

impl QualificationDecision {
    /// String stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Review => "REVIEW",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] for unrecognised values.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            "REVIEW" => Ok(Self::Review),
            other => Err(InvalidEnum::new("lead.qualification_decision", other)),
        }
    }
}

/// A persisted lead, unique per (tenant, email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// Store row id.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: i64,
    /// Campaign that first ingested the lead, when known.
    pub campaign_id: Option<i64>,
    /// Dedup key within the tenant.
    pub email: String,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Job title.
    pub job_title: Option<String>,
    /// Personal LinkedIn profile URL.
    pub linkedin_url: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Company name.
    pub company_name: Option<String>,
    /// Company web domain.
    pub company_domain: Option<String>,
    /// Company industry.
    pub company_industry: Option<String>,
    /// Company headcount.
    pub company_employee_count: Option<u32>,
    /// Normalized company revenue ("$30M").
    pub company_revenue: Option<String>,
    /// Highest-priority source seen so far.
    pub source: LeadSource,
    /// Pixel visit counter; incremented only by pixel-sourced events.
    pub visit_count: u32,
    /// First time any source surfaced this lead.
    pub first_seen_at: DateTime<Utc>,
    /// Most recent sighting.
    pub last_seen_at: DateTime<Utc>,
    /// Present in the email delivery system.
    pub in_email_system: bool,
    /// Present in the LinkedIn automation system.
    pub in_linkedin_system: bool,
    /// Lifecycle status.
    pub status: LeadStatus,
    /// Qualifier verdict, once run.
    pub qualification_decision: Option<QualificationDecision>,
    /// Qualifier confidence in [0,1].
    pub qualification_confidence: Option<f64>,
    /// Qualifier reasoning text.
    pub qualification_reasoning: Option<String>,
    /// Qualifier ICP-fit summary.
    pub icp_fit: Option<String>,
    /// Last computed intent score.
    pub intent_score: Option<u32>,
    /// Tier derived from the intent score.
    pub intent_tier: Option<String>,
    /// Optimistic-lock row version.
    pub version: i64,
}

/// One canonical lead shape produced by the normalizer from any source
/// record. Pure data; no store identity yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLead {
    /// Email address (required; absence is flagged, not fatal).
    pub email: Option<String>,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Job title.
    pub job_title: Option<String>,
    /// Personal LinkedIn URL.
    pub linkedin_url: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Company name (required; absence is flagged, not fatal).
    pub company_name: Option<String>,
    /// Company web domain.
    pub company_domain: Option<String>,
    /// Company industry.
    pub company_industry: Option<String>,
    /// Company headcount; ranges collapse to their midpoint.
    pub company_employee_count: Option<u32>,
    /// Revenue in canonical `$NNK|M|B` form.
    pub company_revenue: Option<String>,
    /// Visited page, for pixel records.
    pub page: Option<String>,
    /// Dwell time on the page in milliseconds, for pixel records.
    pub dwell_ms: Option<u64>,
    /// Tracked site event (form submit, download), for pixel records.
    pub site_event: Option<String>,
    /// Source the record arrived from.
    pub source: Option<LeadSource>,
}

impl NormalizedLead {
    /// Whether the record carries the fields every downstream stage needs.
    pub fn has_required_fields(&self) -> bool {
        self.email.is_some() && self.company_name.is_some()
    }
}
