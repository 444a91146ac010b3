//! Research stage: enrichment waterfall, trigger matching, and the
//! context profile fed into generation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::providers::{EnrichmentFetcher, ProviderRegistry};
use crate::runner::{names, Emitter, EventHandler, StageError, StepContext};
use crate::store::Store;
use crate::types::{IcpProfile, Lead, PersonaSpec, TriggerSpec};

/// Per-source timeout inside the waterfall.
const SOURCE_TIMEOUT: Duration = Duration::from_secs(20);

// ── Profile types ───────────────────────────────────────────────

/// How well the lead matches a target persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaMatchLevel {
    /// Title matches a persona title directly.
    Exact,
    /// Seniority overlaps but the title differs.
    Adjacent,
    /// No persona fit.
    None,
}

/// Persona classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaMatch {
    /// Matched persona name, when any.
    pub persona: Option<String>,
    /// Match level.
    pub level: PersonaMatchLevel,
    /// Confidence in [0,1].
    pub confidence: f64,
}

/// Suggested outreach relationship framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// No prior touchpoints.
    ColdOutreach,
    /// Strong signals suggest familiarity.
    WarmIntroduction,
    /// The company already appears in our systems.
    ExistingRelationship,
}

impl RelationshipType {
    /// String used for attribution bucketing.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdOutreach => "cold_outreach",
            Self::WarmIntroduction => "warm_introduction",
            Self::ExistingRelationship => "existing_relationship",
        }
    }
}

/// One matched ICP trigger with its sub-scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedTrigger {
    /// Trigger name from the ICP.
    pub name: String,
    /// Source blob it matched in.
    pub source: String,
    /// Keyword hits.
    pub matches: u32,
    /// Confidence derived from the hit count.
    pub confidence: f64,
    /// Impact weight from the ICP.
    pub impact: f64,
    /// Recency sub-score.
    pub recency: f64,
    /// Relevance sub-score.
    pub relevance: f64,
    /// Combined total.
    pub total: f64,
}

/// The extracted, structured research output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextProfile {
    /// Persona classification.
    pub persona_match: PersonaMatch,
    /// Ranked matched triggers.
    pub triggers: Vec<MatchedTrigger>,
    /// Free-text company intel summary.
    pub company_intel: Option<String>,
    /// Suggested relationship framing.
    pub relationship: RelationshipType,
    /// Suggested messaging angles.
    pub angles: Vec<String>,
}

// ── Pure matching ───────────────────────────────────────────────

/// Classify the lead's title against the ICP personas.
pub fn match_persona(job_title: Option<&str>, personas: &[PersonaSpec]) -> PersonaMatch {
    let Some(title) = job_title else {
        return PersonaMatch {
            persona: None,
            level: PersonaMatchLevel::None,
            confidence: 0.1,
        };
    };
    let lower = title.to_lowercase();

    for persona in personas {
        if persona
            .titles
            .iter()
            .any(|t| lower.contains(&t.to_lowercase()))
        {
            return PersonaMatch {
                persona: Some(persona.name.clone()),
                level: PersonaMatchLevel::Exact,
                confidence: 0.9,
            };
        }
    }
    for persona in personas {
        if persona
            .seniority
            .iter()
            .any(|s| lower.contains(&s.to_lowercase()))
        {
            return PersonaMatch {
                persona: Some(persona.name.clone()),
                level: PersonaMatchLevel::Adjacent,
                confidence: 0.6,
            };
        }
    }
    PersonaMatch {
        persona: None,
        level: PersonaMatchLevel::None,
        confidence: 0.2,
    }
}

/// Match ICP triggers against the raw source blobs.
///
/// Each trigger searches its declared source ("any" searches all);
/// confidence grows with hit count and saturates at three hits. Results
/// sort by confidence, then hit count.
pub fn match_triggers(triggers: &[TriggerSpec], raw_sources: &Value) -> Vec<MatchedTrigger> {
    let mut matched: Vec<MatchedTrigger> = triggers
        .iter()
        .filter_map(|trigger| {
            let haystack = source_text(raw_sources, &trigger.source);
            if haystack.is_empty() {
                return None;
            }
            let mut hits = 0u32;
            for keyword in &trigger.what_to_look_for {
                let needle = keyword.to_lowercase();
                if !needle.is_empty() {
                    hits = hits.saturating_add(
                        u32::try_from(haystack.matches(&needle).count()).unwrap_or(u32::MAX),
                    );
                }
            }
            if hits == 0 {
                return None;
            }
            let confidence = (f64::from(hits) / 3.0).min(1.0);
            let recency = 0.5;
            let relevance = confidence;
            let total = trigger.impact * 0.4 + recency * 0.2 + relevance * 0.4;
            Some(MatchedTrigger {
                name: trigger.name.clone(),
                source: trigger.source.clone(),
                matches: hits,
                confidence,
                impact: trigger.impact,
                recency,
                relevance,
                total,
            })
        })
        .collect();

    matched.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.matches.cmp(&a.matches))
    });
    matched
}

fn source_text(raw_sources: &Value, source: &str) -> String {
    let blob = match source {
        "any" | "" => Some(raw_sources),
        named => raw_sources.get(named),
    };
    blob.map(|v| v.to_string().to_lowercase()).unwrap_or_default()
}

/// Assemble the profile from its parts.
pub fn build_profile(lead: &Lead, icp: Option<&IcpProfile>, raw_sources: &Value) -> ContextProfile {
    let personas: &[PersonaSpec] = icp.map_or(&[], |icp| &icp.personas);
    let trigger_specs: &[TriggerSpec] = icp.map_or(&[], |icp| &icp.triggers);

    let persona_match = match_persona(lead.job_title.as_deref(), personas);
    let triggers = match_triggers(trigger_specs, raw_sources);

    let relationship = if lead.in_email_system || lead.in_linkedin_system {
        RelationshipType::ExistingRelationship
    } else if persona_match.level == PersonaMatchLevel::Exact && !triggers.is_empty() {
        RelationshipType::WarmIntroduction
    } else {
        RelationshipType::ColdOutreach
    };

    let mut angles: Vec<String> = triggers
        .iter()
        .take(3)
        .map(|t| format!("Lead with {}", t.name))
        .collect();
    if let Some(persona) = &persona_match.persona {
        angles.push(format!("Speak to {persona} priorities"));
    }
    if angles.is_empty() {
        angles.push("Open with the company's industry pressures".to_owned());
    }

    let company_intel = raw_sources
        .get("company_linkedin")
        .and_then(|v| v.get("summary"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    ContextProfile {
        persona_match,
        triggers,
        company_intel,
        relationship,
        angles,
    }
}

// ── Handler ─────────────────────────────────────────────────────

/// The research stage handler.
pub struct ResearchHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
}

impl ResearchHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>, emitter: Emitter) -> Self {
        Self {
            store,
            providers,
            emitter,
        }
    }

    /// Run the enrichment waterfall concurrently with per-source
    /// timeouts. Returns (raw_sources, waterfall_summary).
    async fn waterfall(&self, lead: &Lead) -> (Value, Value) {
        let Ok(fetcher) = self.providers.enrichment() else {
            warn!(lead = lead.id, "no enrichment fetcher configured");
            return (json!({}), json!({"skipped": true}));
        };

        let personal = fetch_optional(&fetcher, lead.linkedin_url.clone());
        let company_url = lead
            .company_domain
            .as_deref()
            .map(|domain| format!("https://www.linkedin.com/company/{}", domain_stem(domain)));
        let company = fetch_optional(&fetcher, company_url);
        let web_query = lead.company_name.as_deref().map(|company| {
            format!(
                "https://duckduckgo.com/html/?q={}",
                company.replace(' ', "+")
            )
        });
        let web = fetch_optional(&fetcher, web_query);

        let (personal, company, web) = tokio::join!(personal, company, web);

        let mut raw = serde_json::Map::new();
        let mut summary = serde_json::Map::new();
        for (name, result) in [
            ("personal_linkedin", personal),
            ("company_linkedin", company),
            ("web_search", web),
        ] {
            summary.insert(name.to_owned(), json!(result.is_some()));
            if let Some(value) = result {
                raw.insert(name.to_owned(), value);
            }
        }
        (Value::Object(raw), Value::Object(summary))
    }
}

fn domain_stem(domain: &str) -> String {
    domain
        .trim_start_matches("www.")
        .split('.')
        .next()
        .unwrap_or(domain)
        .to_owned()
}

async fn fetch_optional(
    fetcher: &Arc<dyn EnrichmentFetcher>,
    url: Option<String>,
) -> Option<Value> {
    let url = url?;
    match tokio::time::timeout(SOURCE_TIMEOUT, fetcher.fetch_page(&url)).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            debug!(url = %url, error = %err, "enrichment source failed");
            None
        }
        Err(_) => {
            debug!(url = %url, "enrichment source timed out");
            None
        }
    }
}

#[async_trait]
impl EventHandler for ResearchHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEAD_READY_FOR_DEPLOYMENT]
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let lead_id = payload
            .get("lead_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("research event without lead_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("research event without tenant_id"))?;
        let campaign_id = payload.get("campaign_id").and_then(Value::as_i64);

        let lead = self.store.get_lead(tenant_id, lead_id).await?;

        // Fresh research is reused; the expensive calls are skipped.
        let existing = self.store.get_research(tenant_id, lead_id).await?;
        if let Some(record) = existing {
            if record.is_fresh(Utc::now()) {
                debug!(lead = lead_id, "research is fresh; reusing");
                ctx.run("emit-complete", async {
                    self.emitter
                        .emit(
                            names::LEAD_RESEARCH_COMPLETE,
                            &json!({
                                "lead_id": lead_id,
                                "tenant_id": tenant_id,
                                "campaign_id": campaign_id,
                            }),
                        )
                        .await
                        .map_err(|e| StageError::transient(e.to_string()))?;
                    Ok(())
                })
                .await?;
                return Ok(());
            }
        }

        let (raw_sources, summary) = ctx
            .run("waterfall", async { Ok(self.waterfall(&lead).await) })
            .await?;

        let icp = ctx
            .run("fetch-icp", async {
                let tenant = self.store.get_tenant(tenant_id).await?;
                Ok(tenant.icp)
            })
            .await?;

        let profile = build_profile(&lead, icp.as_ref(), &raw_sources);
        info!(
            lead = lead_id,
            triggers = profile.triggers.len(),
            relationship = profile.relationship.as_str(),
            "research profile built"
        );

        ctx.run("persist", async {
            self.store
                .upsert_research(tenant_id, lead_id, &raw_sources, &profile, &summary, Utc::now())
                .await?;
            Ok(())
        })
        .await?;

        ctx.run("emit-complete", async {
            self.emitter
                .emit(
                    names::LEAD_RESEARCH_COMPLETE,
                    &json!({
                        "lead_id": lead_id,
                        "tenant_id": tenant_id,
                        "campaign_id": campaign_id,
                    }),
                )
                .await
                .map_err(|e| StageError::transient(e.to_string()))?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}
