//! Sequence review: score, loop back with instructions, or escalate.
//!
//! Review attempts are idempotent on (sequence, attempt). REVISE loops
//! back to the generator at most three times before a human takes over.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::providers::{ChatMessage, ChatRequest, ProviderRegistry};
use crate::qualify::llm::strip_code_fences;
use crate::runner::{names, Emitter, EventHandler, StageError, StepContext};
use crate::store::Store;
use crate::types::{sequence::MAX_REVISION_ATTEMPTS, LeadStatus, Sequence, SequenceStatus};

/// System prompt for the reviewer call.
const REVIEWER_SYSTEM: &str = "You are a rigorous outbound copy chief. Score the sequence for \
personalization, clarity, and coordination across channels. Respond with JSON only: \
{\"decision\": \"APPROVE\"|\"REVISE\"|\"HUMAN_REVIEW\", \"overallScore\": 0-100, \
\"sequenceLevelIssues\": [string], \"revisionInstructions\": string, \
\"humanReviewReason\": string}";

/// The reviewer's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    /// Ship it.
    Approve,
    /// Loop back with instructions.
    Revise,
    /// A human must look at it.
    HumanReview,
}

impl ReviewDecision {
    /// String stored on the sequence row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Revise => "REVISE",
            Self::HumanReview => "HUMAN_REVIEW",
        }
    }
}

/// Parsed reviewer verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    /// The decision.
    pub decision: ReviewDecision,
    /// Overall score 0..100.
    pub overall_score: f64,
    /// Sequence-level issues found.
    pub sequence_level_issues: Vec<String>,
    /// Instructions for the revision run.
    pub revision_instructions: Option<String>,
    /// Why a human is needed.
    pub human_review_reason: Option<String>,
}

/// Parse the reviewer's JSON verdict. Unparseable output escalates to
/// HUMAN_REVIEW rather than shipping unreviewed copy.
pub fn parse_review(content: &str) -> ReviewVerdict {
    let stripped = strip_code_fences(content);
    let Ok(parsed) = serde_json::from_str::<Value>(stripped.trim()) else {
        warn!("reviewer returned unparseable JSON; escalating to human");
        return ReviewVerdict {
            decision: ReviewDecision::HumanReview,
            overall_score: 0.0,
            sequence_level_issues: vec![],
            revision_instructions: None,
            human_review_reason: Some("reviewer response was not valid JSON".to_owned()),
        };
    };

    let decision = match parsed.get("decision").and_then(Value::as_str) {
        Some("APPROVE") => ReviewDecision::Approve,
        Some("REVISE") => ReviewDecision::Revise,
        _ => ReviewDecision::HumanReview,
    };
    ReviewVerdict {
        decision,
        overall_score: parsed
            .get("overallScore")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        sequence_level_issues: parsed
            .get("sequenceLevelIssues")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        revision_instructions: parsed
            .get("revisionInstructions")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        human_review_reason: parsed
            .get("humanReviewReason")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
    }
}

/// The review stage handler.
pub struct ReviewHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
}

impl ReviewHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>, emitter: Emitter) -> Self {
        Self {
            store,
            providers,
            emitter,
        }
    }

    async fn run_reviewer(&self, sequence: &Sequence) -> Result<ReviewVerdict, StageError> {
        let tenant = self.store.get_tenant(sequence.tenant_id).await?;
        let prompt_version = self
            .store
            .active_prompt_version(sequence.tenant_id, "reviewer")
            .await?;

        let mut prompt = String::new();
        if let Some(version) = &prompt_version {
            prompt.push_str(&version.body);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "## Sequence (mode: {})\n{}\n\nRespond with the JSON verdict only.",
            sequence.mode.as_str(),
            serde_json::to_string_pretty(&json!({
                "email_steps": sequence.email_steps,
                "linkedin_steps": sequence.linkedin_steps,
                "strategy": sequence.strategy,
            }))
            .unwrap_or_default(),
        ));

        let llm = self.providers.llm_for_tenant(&tenant).map_err(StageError::from)?;
        let response = llm
            .chat(ChatRequest {
                system: Some(REVIEWER_SYSTEM.to_owned()),
                messages: vec![ChatMessage::user(prompt)],
                max_tokens: Some(2_000),
                temperature: Some(0.0),
                thinking_budget: None,
            })
            .await
            .map_err(StageError::from)?;
        Ok(parse_review(&response.content))
    }

    async fn escalate(
        &self,
        sequence: &Sequence,
        reason: &str,
    ) -> Result<(), StageError> {
        self.store
            .set_sequence_review(
                sequence.tenant_id,
                sequence.id,
                None,
                "HUMAN_REVIEW",
                SequenceStatus::HumanReview,
            )
            .await?;
        self.store
            .update_lead_status(sequence.tenant_id, sequence.lead_id, LeadStatus::HumanReview)
            .await?;
        let tenant = self.store.get_tenant(sequence.tenant_id).await?;
        self.providers
            .notifier()
            .send(
                tenant.notify_channel.as_deref().unwrap_or("reviews"),
                &json!({
                    "kind": "sequence_human_review",
                    "sequence_id": sequence.id,
                    "lead_id": sequence.lead_id,
                    "reason": reason,
                }),
            )
            .await
            .ok();
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ReviewHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::SEQUENCE_REVIEW_REQUESTED]
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let sequence_id = payload
            .get("sequence_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("review event without sequence_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("review event without tenant_id"))?;
        let attempt = payload
            .get("attempt")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1);

        let sequence = self.store.get_sequence(tenant_id, sequence_id).await?;
        if sequence.status.is_terminal() {
            info!(sequence = sequence_id, "sequence review already settled");
            return Ok(());
        }

        let verdict = ctx
            .run("llm-review", async { self.run_reviewer(&sequence).await })
            .await?;

        // Duplicate deliveries of the same attempt are no-ops.
        let fresh = self
            .store
            .record_review_attempt(
                tenant_id,
                sequence_id,
                attempt,
                verdict.decision.as_str(),
                Some(verdict.overall_score),
                &serde_json::to_value(&verdict).unwrap_or(Value::Null),
            )
            .await?;
        if !fresh {
            info!(sequence = sequence_id, attempt, "review attempt already recorded");
            return Ok(());
        }

        match verdict.decision {
            ReviewDecision::Approve => {
                self.store
                    .set_sequence_review(
                        tenant_id,
                        sequence_id,
                        Some(verdict.overall_score),
                        "APPROVE",
                        SequenceStatus::Approved,
                    )
                    .await?;
                self.store
                    .update_lead_status(tenant_id, sequence.lead_id, LeadStatus::SequenceReady)
                    .await?;
                self.store
                    .append_engagement_log(
                        tenant_id,
                        sequence.lead_id,
                        "sequence.approved",
                        &json!({"score": verdict.overall_score, "attempt": attempt}),
                    )
                    .await?;
                let tenant = self.store.get_tenant(tenant_id).await?;
                self.providers
                    .notifier()
                    .send(
                        tenant.notify_channel.as_deref().unwrap_or("reviews"),
                        &json!({
                            "kind": "sequence_approved",
                            "sequence_id": sequence_id,
                            "score": verdict.overall_score,
                        }),
                    )
                    .await
                    .ok();
                ctx.run("emit-ready", async {
                    self.emitter
                        .emit(
                            names::LEAD_SEQUENCE_READY,
                            &json!({
                                "sequence_id": sequence_id,
                                "tenant_id": tenant_id,
                                "lead_id": sequence.lead_id,
                            }),
                        )
                        .await
                        .map_err(|e| StageError::transient(e.to_string()))?;
                    Ok(())
                })
                .await?;
                info!(sequence = sequence_id, score = verdict.overall_score, "sequence approved");
                Ok(())
            }
            ReviewDecision::Revise if attempt < MAX_REVISION_ATTEMPTS => {
                self.store
                    .set_sequence_review(
                        tenant_id,
                        sequence_id,
                        Some(verdict.overall_score),
                        "REVISE",
                        SequenceStatus::Revising,
                    )
                    .await?;
                ctx.run("emit-revision", async {
                    self.emitter
                        .emit(
                            names::LEAD_SEQUENCE_REVISION_NEEDED,
                            &json!({
                                "sequence_id": sequence_id,
                                "tenant_id": tenant_id,
                                "lead_id": sequence.lead_id,
                                "attempt": attempt.saturating_add(1),
                                "revision_instructions": verdict.revision_instructions,
                            }),
                        )
                        .await
                        .map_err(|e| StageError::transient(e.to_string()))?;
                    Ok(())
                })
                .await?;
                info!(sequence = sequence_id, attempt, "revision requested");
                Ok(())
            }
            ReviewDecision::Revise | ReviewDecision::HumanReview => {
                let reason = verdict
                    .human_review_reason
                    .or(verdict.revision_instructions)
                    .unwrap_or_else(|| "review loop exhausted".to_owned());
                self.escalate(&sequence, &reason).await?;
                info!(sequence = sequence_id, attempt, "escalated to human review");
                Ok(())
            }
        }
    }
}
