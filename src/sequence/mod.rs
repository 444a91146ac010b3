//! Sequence generation: research → multi-touch plan.
//!
//! Consumes `lead.research-complete` for first drafts and
//! `lead.sequence-revision-needed` for reviewer-driven rewrites. A parse
//! failure retries once, then escalates the lead to human review.

pub mod compose;
pub mod timeline;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::providers::{ChatMessage, ChatRequest, ProviderRegistry};
use crate::runner::{names, Emitter, EventHandler, RetryPolicy, StageError, StepContext};
use crate::store::prompts::PromptVersion;
use crate::store::sequences::NewSequence;
use crate::store::Store;
use crate::types::{Lead, LeadStatus};

pub use compose::{parse_generated, GeneratedSequence, GenerationInput, RevisionContext};

/// Extended-thinking budget for generation calls.
const THINKING_BUDGET: u32 = 8_000;
/// Response token cap for generation calls.
const MAX_TOKENS: u32 = 12_000;
/// Prompt name generation draws from.
pub const SEQUENCE_WRITER_PROMPT: &str = "sequence-writer";

/// Pick the prompt version for a generation call, honoring any running
/// A/B test with a random split draw.
pub async fn select_prompt_version(
    store: &Store,
    tenant_id: i64,
    prompt_name: &str,
) -> Result<Option<PromptVersion>, StageError> {
    let active = store.active_prompt_version(tenant_id, prompt_name).await?;
    let Some(test) = store.running_ab_test(tenant_id, prompt_name).await? else {
        return Ok(active);
    };
    let draw: i64 = rand::thread_rng().gen_range(0..100);
    if draw < test.split_percent {
        let variant = store
            .get_prompt_version(tenant_id, test.variant_version_id)
            .await?;
        return Ok(Some(variant));
    }
    Ok(active)
}

/// Shared generation machinery for first drafts and revisions.
pub struct GenerationHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
}

impl GenerationHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>, emitter: Emitter) -> Self {
        Self {
            store,
            providers,
            emitter,
        }
    }

    /// Brand-scoped RAG where available, tenant-scoped otherwise, plus
    /// the global fundamentals documents.
    async fn fundamentals(&self, tenant_id: i64, brand_id: i64) -> Result<String, StageError> {
        let docs = self
            .store
            .list_rag_documents(tenant_id, Some(brand_id), "fundamentals", 8)
            .await?;
        let learned = self
            .store
            .list_rag_documents(tenant_id, Some(brand_id), "learned", 8)
            .await?;
        let mut out = String::new();
        for doc in docs.iter().chain(learned.iter()) {
            out.push_str(&format!("### {}\n{}\n\n", doc.title, doc.content));
        }
        Ok(out)
    }

    /// One full generation run; shared by the two entry events.
    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        ctx: &StepContext,
        lead: &Lead,
        campaign_id: i64,
        revision: Option<(String, String)>,
        attempt: u32,
        existing_sequence_id: Option<i64>,
    ) -> Result<i64, StageError> {
        let tenant_id = lead.tenant_id;
        let campaign = self.store.get_campaign(tenant_id, campaign_id).await?;
        if !campaign.is_active() {
            return Err(StageError::fatal(format!(
                "campaign {campaign_id} is {}",
                campaign.status.as_str()
            )));
        }
        let tenant = self.store.get_tenant(tenant_id).await?;
        let brand = self.store.get_brand(tenant_id, campaign.brand_id).await?;
        let research = self
            .store
            .get_research(tenant_id, lead.id)
            .await?
            .ok_or_else(|| StageError::fatal(format!("lead {} has no research", lead.id)))?;

        let fundamentals = ctx
            .run("fundamentals", async {
                self.fundamentals(tenant_id, campaign.brand_id).await
            })
            .await?;

        let prompt_version = select_prompt_version(&self.store, tenant_id, SEQUENCE_WRITER_PROMPT)
            .await?;

        let icp = brand.effective_icp(&tenant).cloned();
        let input = GenerationInput {
            lead,
            profile: &research.profile,
            campaign: &campaign,
            brand: &brand,
            icp: icp.as_ref(),
            fundamentals: &fundamentals,
            prompt_body: prompt_version.as_ref().map(|v| v.body.as_str()),
            revision: revision.as_ref().map(|(instructions, previous)| RevisionContext {
                instructions,
                previous,
            }),
        };
        let prompt = compose::compose_prompt(&input);

        let llm = self.providers.llm_for_tenant(&tenant).map_err(StageError::from)?;
        let content = ctx
            .run("llm-generate", async {
                let response = llm
                    .chat(ChatRequest {
                        system: None,
                        messages: vec![ChatMessage::user(prompt)],
                        max_tokens: Some(MAX_TOKENS),
                        temperature: Some(0.7),
                        thinking_budget: Some(THINKING_BUDGET),
                    })
                    .await
                    .map_err(StageError::from)?;
                Ok(response.content)
            })
            .await?;

        let generated = match parse_generated(&content) {
            Ok(generated) => generated,
            Err(reason) => {
                // One retry, then the sequence goes to a human.
                if attempt >= 2 {
                    warn!(lead = lead.id, reason = %reason, "generation unparseable; escalating");
                    self.store
                        .update_lead_status(tenant_id, lead.id, LeadStatus::HumanReview)
                        .await?;
                    self.providers
                        .notifier()
                        .send(
                            tenant.notify_channel.as_deref().unwrap_or("reviews"),
                            &json!({
                                "kind": "generation_failed",
                                "lead_id": lead.id,
                                "reason": reason,
                            }),
                        )
                        .await
                        .ok();
                    return Ok(0);
                }
                return Err(StageError::transient(format!("unparseable sequence: {reason}")));
            }
        };

        let sequence_id = ctx
            .run("persist-sequence", async {
                match existing_sequence_id {
                    Some(sequence_id) => {
                        self.store
                            .update_sequence_content(
                                tenant_id,
                                sequence_id,
                                &generated.email_steps,
                                &generated.linkedin_steps,
                                &generated.strategy,
                                attempt.saturating_sub(1),
                            )
                            .await?;
                        Ok(sequence_id)
                    }
                    None => {
                        let id = self
                            .store
                            .insert_sequence(&NewSequence {
                                tenant_id,
                                lead_id: lead.id,
                                campaign_id,
                                mode: campaign.mode,
                                email_steps: generated.email_steps.clone(),
                                linkedin_steps: generated.linkedin_steps.clone(),
                                strategy: generated.strategy.clone(),
                                revision_count: 0,
                                prompt_version_id: prompt_version.as_ref().map(|v| v.id),
                            })
                            .await?;
                        Ok(id)
                    }
                }
            })
            .await?;

        ctx.run("request-review", async {
            self.emitter
                .emit(
                    names::SEQUENCE_REVIEW_REQUESTED,
                    &json!({
                        "sequence_id": sequence_id,
                        "tenant_id": tenant_id,
                        "lead_id": lead.id,
                        "attempt": attempt,
                    }),
                )
                .await
                .map_err(|e| StageError::transient(e.to_string()))?;
            Ok(())
        })
        .await?;

        info!(lead = lead.id, sequence = sequence_id, attempt, "sequence generated");
        Ok(sequence_id)
    }
}

#[async_trait]
impl EventHandler for GenerationHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEAD_RESEARCH_COMPLETE]
    }

    fn retry_policy(&self) -> RetryPolicy {
        // Parse failures retry once before human escalation.
        RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        }
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let lead_id = payload
            .get("lead_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("generation event without lead_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("generation event without tenant_id"))?;

        let lead = self.store.get_lead(tenant_id, lead_id).await?;
        let campaign_id = payload
            .get("campaign_id")
            .and_then(Value::as_i64)
            .or(lead.campaign_id)
            .ok_or_else(|| StageError::fatal("lead has no campaign"))?;

        // One open review per (lead, campaign): a replay or duplicate
        // delivery must not mint a second pending sequence.
        if self
            .store
            .has_open_sequence(tenant_id, lead_id, campaign_id)
            .await?
        {
            info!(lead = lead_id, "open sequence exists; skipping generation");
            return Ok(());
        }

        self.generate(ctx, &lead, campaign_id, None, ctx.attempt(), None)
            .await?;
        Ok(())
    }
}

/// Re-runs the generator with the reviewer's instructions and the
/// previous draft, then requests re-review.
pub struct RevisionHandler {
    inner: GenerationHandler,
    store: Store,
    emitter: Emitter,
}

impl RevisionHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>, emitter: Emitter) -> Self {
        Self {
            inner: GenerationHandler::new(store.clone(), providers, emitter.clone()),
            store,
            emitter,
        }
    }
}

#[async_trait]
impl EventHandler for RevisionHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEAD_SEQUENCE_REVISION_NEEDED]
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        }
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let sequence_id = payload
            .get("sequence_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("revision event without sequence_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("revision event without tenant_id"))?;
        let attempt = payload
            .get("attempt")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1);
        let instructions = payload
            .get("revision_instructions")
            .and_then(Value::as_str)
            .unwrap_or("Tighten the copy and strengthen the call to action.")
            .to_owned();

        let sequence = self.store.get_sequence(tenant_id, sequence_id).await?;
        let lead = self.store.get_lead(tenant_id, sequence.lead_id).await?;
        let previous = serde_json::to_string(&json!({
            "email_steps": sequence.email_steps,
            "linkedin_steps": sequence.linkedin_steps,
        }))
        .unwrap_or_default();

        self.inner
            .generate(
                ctx,
                &lead,
                sequence.campaign_id,
                Some((instructions, previous)),
                attempt,
                Some(sequence_id),
            )
            .await?;

        ctx.run("emit-revision-complete", async {
            self.emitter
                .emit(
                    names::LEAD_SEQUENCE_REVISION_COMPLETE,
                    &json!({
                        "sequence_id": sequence_id,
                        "tenant_id": tenant_id,
                        "lead_id": sequence.lead_id,
                        "attempt": attempt,
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
