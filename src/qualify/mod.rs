//! Qualification stage: dedup, visit tracking, and the YES/NO/REVIEW
//! decision.
//!
//! Processes `lead.ingested` and `lead.intent-ingested`. Returning
//! visitors with a prior qualification skip the LLM: five or more visits
//! auto-qualify on intent alone, two to four just log the return. Fresh
//! leads run the LLM qualifier over the ICP and the lead's signals.

pub mod company;
pub mod llm;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::normalize;
use crate::providers::ProviderRegistry;
use crate::runner::{names, Emitter, EventHandler, StageError, StepContext};
use crate::scoring;
use crate::types::{Lead, LeadSource, LeadStatus, NormalizedLead, QualificationDecision};

use crate::store::Store;

pub use llm::{parse_qualification, QualificationVerdict};

/// Tunables for qualification.
#[derive(Debug, Clone)]
pub struct QualifySettings {
    /// REVIEW decisions fall through to YES when set (the production
    /// alternative is a bounded human-review wait).
    pub auto_approve_review: bool,
    /// ICP RAG documents included in the qualifier prompt.
    pub max_rag_docs: u32,
}

impl Default for QualifySettings {
    fn default() -> Self {
        Self {
            auto_approve_review: true,
            max_rag_docs: 5,
        }
    }
}

/// Which path the decision policy took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum DecisionPath {
    /// Prior qualification + ≥5 visits.
    AutoQualify,
    /// Prior qualification + 2..=4 visits; no downstream event.
    ReturnVisit,
    /// Run the LLM qualifier.
    Qualify,
}

/// The qualification stage handler.
pub struct QualificationHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
    settings: QualifySettings,
}

impl QualificationHandler {
    /// Build the handler.
    pub fn new(
        store: Store,
        providers: Arc<ProviderRegistry>,
        emitter: Emitter,
        settings: QualifySettings,
    ) -> Self {
        Self {
            store,
            providers,
            emitter,
            settings,
        }
    }

    async fn upsert(
        &self,
        tenant_id: i64,
        campaign_id: Option<i64>,
        record: &NormalizedLead,
        source: LeadSource,
    ) -> Result<UpsertSnapshot, StageError> {
        let result = self
            .store
            .upsert_lead(tenant_id, campaign_id, record, source, Utc::now())
            .await?;
        Ok(UpsertSnapshot {
            lead_id: result.lead.id,
            created: result.created,
            visit_count: result.lead.visit_count,
            prior_decision: result.lead.qualification_decision,
        })
    }

    async fn probe_relationship(&self, lead: &Lead) -> Result<(), StageError> {
        let Some(company) = lead.company_name.as_deref() else {
            return Ok(());
        };
        let known = self.store.list_company_presence(lead.tenant_id).await?;
        let mut in_email = lead.in_email_system;
        let mut in_linkedin = lead.in_linkedin_system;
        for entry in &known {
            if company::companies_match(company, &entry.company_name) {
                in_email = in_email || entry.in_email_system;
                in_linkedin = in_linkedin || entry.in_linkedin_system;
            }
        }
        if in_email != lead.in_email_system || in_linkedin != lead.in_linkedin_system {
            self.store
                .set_presence_flags(lead.tenant_id, lead.id, in_email, in_linkedin)
                .await?;
        }
        Ok(())
    }

    /// Run the LLM qualifier and return the (possibly coerced) verdict.
    async fn llm_qualify(
        &self,
        lead: &Lead,
        intent_total: u32,
        intent_tier: &str,
    ) -> Result<QualificationVerdict, StageError> {
        let tenant = self.store.get_tenant(lead.tenant_id).await?;
        let docs = self
            .store
            .list_rag_documents(lead.tenant_id, None, "icp", self.settings.max_rag_docs)
            .await?;
        let prompt = llm::build_qualifier_prompt(lead, &tenant, &docs, intent_total, intent_tier);

        let llm = self.providers.llm_for_tenant(&tenant).map_err(StageError::from)?;
        let response = llm
            .chat(crate::providers::ChatRequest {
                system: Some(llm::QUALIFIER_SYSTEM.to_owned()),
                messages: vec![crate::providers::ChatMessage::user(prompt)],
                max_tokens: Some(500),
                temperature: Some(0.2),
                thinking_budget: None,
            })
            .await
            .map_err(StageError::from)?;

        Ok(parse_qualification(&response.content))
    }
}

/// Minimal durable snapshot of the upsert step.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpsertSnapshot {
    lead_id: i64,
    created: bool,
    visit_count: u32,
    prior_decision: Option<QualificationDecision>,
}

#[async_trait]
impl EventHandler for QualificationHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEAD_INGESTED, names::LEAD_INTENT_INGESTED]
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("lead event without tenant_id"))?;
        let campaign_id = payload.get("campaign_id").and_then(Value::as_i64);
        let source_raw = payload
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::fatal("lead event without source"))?;
        let source =
            LeadSource::parse(source_raw).map_err(|e| StageError::fatal(e.to_string()))?;
        let record_raw = payload
            .get("record")
            .cloned()
            .ok_or_else(|| StageError::fatal("lead event without record"))?;

        // Campaign status re-asserted at handler entry.
        if let Some(campaign_id) = campaign_id {
            ctx.run("assert-campaign", async {
                let campaign = self.store.get_campaign(tenant_id, campaign_id).await?;
                if !campaign.is_active() {
                    return Err(StageError::fatal(format!(
                        "campaign {campaign_id} is {}",
                        campaign.status.as_str()
                    )));
                }
                Ok(())
            })
            .await?;
        }

        let record = normalize::normalize(&record_raw, source);
        if record.email.is_none() {
            return Err(StageError::fatal("lead record has no email"));
        }

        let snapshot = ctx
            .run("upsert-lead", async {
                self.upsert(tenant_id, campaign_id, &record, source).await
            })
            .await?;

        // Visit logging: pixel sightings append to the visit history,
        // everything else to the generic engagement log.
        ctx.run("log-visit", async {
            if source == LeadSource::Pixel {
                self.store
                    .record_pixel_visit(
                        tenant_id,
                        snapshot.lead_id,
                        record.page.as_deref(),
                        record.dwell_ms,
                        Utc::now(),
                    )
                    .await?;
            } else {
                self.store
                    .append_engagement_log(
                        tenant_id,
                        snapshot.lead_id,
                        "lead.ingested",
                        &json!({"source": source.as_str()}),
                    )
                    .await?;
            }
            Ok(())
        })
        .await?;

        // Intent score: intent events carry theirs; pixel sightings are
        // graded on the composite. Returning visitors keep their stored
        // score.
        let (intent_total, intent_tier) = ctx
            .run("score-intent", async {
                if let Some(intent) = payload.get("intent") {
                    let total = intent
                        .get("score")
                        .and_then(Value::as_u64)
                        .and_then(|v| u32::try_from(v).ok())
                        .unwrap_or(0);
                    let tier = intent
                        .get("tier")
                        .and_then(Value::as_str)
                        .unwrap_or("weak")
                        .to_owned();
                    self.store
                        .set_intent(tenant_id, snapshot.lead_id, total, &tier)
                        .await?;
                    return Ok((total, tier));
                }
                if source == LeadSource::Pixel && snapshot.prior_decision.is_none() {
                    let score = scoring::pixel_intent_score(
                        snapshot.visit_count,
                        record.page.as_deref(),
                        record.dwell_ms,
                        record.site_event.as_deref(),
                    );
                    let tier = scoring::IntentTier::for_total(score.total);
                    self.store
                        .set_intent(tenant_id, snapshot.lead_id, score.total, tier.as_str())
                        .await?;
                    return Ok((score.total, tier.as_str().to_owned()));
                }
                let lead = self.store.get_lead(tenant_id, snapshot.lead_id).await?;
                Ok((
                    lead.intent_score.unwrap_or(0),
                    lead.intent_tier.unwrap_or_else(|| "weak".to_owned()),
                ))
            })
            .await?;

        ctx.run("relationship-probe", async {
            let lead = self.store.get_lead(tenant_id, snapshot.lead_id).await?;
            self.probe_relationship(&lead).await
        })
        .await?;

        let path = decision_path(snapshot.prior_decision, snapshot.visit_count);

        let verdict = match path {
            DecisionPath::ReturnVisit => {
                ctx.run("log-return-visit", async {
                    self.store
                        .append_engagement_log(
                            tenant_id,
                            snapshot.lead_id,
                            "visit.return",
                            &json!({"visit_count": snapshot.visit_count}),
                        )
                        .await?;
                    Ok(())
                })
                .await?;
                debug!(lead = snapshot.lead_id, "return visit; qualification skipped");
                return Ok(());
            }
            DecisionPath::AutoQualify => {
                ctx.run("log-auto-qualify", async {
                    self.store
                        .append_engagement_log(
                            tenant_id,
                            snapshot.lead_id,
                            "qualification.auto_qualified",
                            &json!({"visit_count": snapshot.visit_count}),
                        )
                        .await?;
                    Ok(())
                })
                .await?;
                QualificationVerdict {
                    decision: QualificationDecision::Yes,
                    confidence: 0.9,
                    reasoning: "strong intent - multiple return visits".to_owned(),
                    icp_fit: None,
                }
            }
            DecisionPath::Qualify => {
                let lead = self.store.get_lead(tenant_id, snapshot.lead_id).await?;
                ctx.run("llm-qualify", async {
                    self.llm_qualify(&lead, intent_total, &intent_tier).await
                })
                .await?
            }
        };

        ctx.run("persist-decision", async {
            self.store
                .set_qualification(
                    tenant_id,
                    snapshot.lead_id,
                    verdict.decision,
                    verdict.confidence,
                    &verdict.reasoning,
                    verdict.icp_fit.as_deref(),
                )
                .await?;
            Ok(())
        })
        .await?;

        let effective = match verdict.decision {
            QualificationDecision::Review if self.settings.auto_approve_review => {
                QualificationDecision::Yes
            }
            other => other,
        };

        match effective {
            QualificationDecision::No => {
                ctx.run("disqualify", async {
                    self.store
                        .update_lead_status(tenant_id, snapshot.lead_id, LeadStatus::Disqualified)
                        .await?;
                    self.store
                        .append_engagement_log(
                            tenant_id,
                            snapshot.lead_id,
                            "qualification.disqualified",
                            &json!({"reason": verdict.reasoning}),
                        )
                        .await?;
                    Ok(())
                })
                .await?;
                info!(lead = snapshot.lead_id, "lead disqualified");
                Ok(())
            }
            QualificationDecision::Review => {
                ctx.run("park-for-review", async {
                    self.store
                        .update_lead_status(tenant_id, snapshot.lead_id, LeadStatus::HumanReview)
                        .await?;
                    Ok(())
                })
                .await?;
                info!(lead = snapshot.lead_id, "lead parked for human review");
                Ok(())
            }
            QualificationDecision::Yes => {
                ctx.run("mark-researched", async {
                    self.store
                        .update_lead_status(tenant_id, snapshot.lead_id, LeadStatus::Researched)
                        .await?;
                    Ok(())
                })
                .await?;
                ctx.run("emit-ready", async {
                    self.emitter
                        .emit(
                            names::LEAD_READY_FOR_DEPLOYMENT,
                            &json!({
                                "lead_id": snapshot.lead_id,
                                "tenant_id": tenant_id,
                                "campaign_id": campaign_id,
                                "visit_count": snapshot.visit_count,
                                "qualification": {
                                    "decision": verdict.decision.as_str(),
                                    "confidence": verdict.confidence,
                                    "reasoning": verdict.reasoning,
                                },
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
    }
}

/// Pick the decision path from prior state.
fn decision_path(prior: Option<QualificationDecision>, visit_count: u32) -> DecisionPath {
    match prior {
        Some(_) if visit_count >= 5 => DecisionPath::AutoQualify,
        Some(_) if visit_count >= 2 => DecisionPath::ReturnVisit,
        _ => DecisionPath::Qualify,
    }
}
