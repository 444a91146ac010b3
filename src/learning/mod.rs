//! The learning loop: attribute → discover → validate → promote →
//! deprecate → evolve → arbitrate.
//!
//! Runs daily per tenant (cron fan-out) and on demand. Each stage is a
//! checkpointed step so a crashed run resumes where it stopped.

pub mod patterns;
pub mod performance;
pub mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::providers::{ChatMessage, ChatRequest, ProviderRegistry};
use crate::runner::{names, Emitter, EventHandler, StageError, StepContext};
use crate::store::patterns::PatternStatus;
use crate::store::Store;

use performance::PERIOD_30D;

/// Fans the daily learning cron out per tenant.
pub struct LearningScanHandler {
    store: Store,
    emitter: Emitter,
}

impl LearningScanHandler {
    /// Build the handler.
    pub fn new(store: Store, emitter: Emitter) -> Self {
        Self { store, emitter }
    }
}

#[async_trait]
impl EventHandler for LearningScanHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEARNING_SCAN]
    }

    async fn handle(&self, _ctx: &StepContext, _payload: Value) -> Result<(), StageError> {
        let tenants = self.store.list_tenants().await?;
        for tenant in tenants {
            self.emitter
                .emit(names::LEARNING_ANALYZE, &json!({"tenant_id": tenant.id}))
                .await
                .map_err(|e| StageError::transient(e.to_string()))?;
        }
        Ok(())
    }
}

/// Runs the full learning pipeline for one tenant.
pub struct LearningHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
}

impl LearningHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }

    /// Render the RAG document for a promoted pattern. The LLM writes
    /// it when available; the template stands in otherwise.
    async fn pattern_document(
        &self,
        tenant: &crate::types::Tenant,
        elements: &Value,
        lift: f64,
        sample_size: i64,
    ) -> (String, String) {
        let (title, fallback) = patterns::render_pattern_document(elements, lift, sample_size);
        let Ok(llm) = self.providers.llm_for_tenant(tenant) else {
            return (title, fallback);
        };
        let request = ChatRequest {
            system: Some(
                "Write one short guidance paragraph for outbound copywriters.".to_owned(),
            ),
            messages: vec![ChatMessage::user(format!(
                "Pattern: {elements}. Reply-rate lift {lift:.1}x over {sample_size} sends. \
                 Explain when to use it, in under 80 words."
            ))],
            max_tokens: Some(300),
            temperature: Some(0.4),
            thinking_budget: None,
        };
        match llm.chat(request).await {
            Ok(response) if !response.content.trim().is_empty() => (title, response.content),
            _ => (title, fallback),
        }
    }
}

#[async_trait]
impl EventHandler for LearningHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEARNING_ANALYZE]
    }

    fn concurrency(&self) -> usize {
        2
    }

    #[allow(clippy::too_many_lines)]
    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("learning event without tenant_id"))?;
        let tenant = self.store.get_tenant(tenant_id).await?;
        let since = Utc::now()
            .checked_sub_signed(Duration::days(30))
            .unwrap_or_else(Utc::now);

        let tagged = self.store.list_tagged_outreach_since(tenant_id, since).await?;
        let engagements = self.store.list_engagements_since(tenant_id, since).await?;
        let outcomes = performance::outcomes_by_outreach(&engagements);

        // 1. Element-performance aggregates.
        ctx.run("refresh-performance", async {
            let rows = performance::compute_element_performance(&tagged, &outcomes);
            let count = rows.len();
            for row in &rows {
                self.store.upsert_element_performance(tenant_id, row).await?;
            }
            Ok(count)
        })
        .await?;

        // 8 (computed early so discovery lifts against fresh numbers):
        // tenant-wide baselines.
        let baseline = performance::compute_baseline(&tagged, &outcomes);
        ctx.run("refresh-baseline", async {
            for (metric, value) in [
                ("open_rate", baseline.open_rate),
                ("reply_rate", baseline.reply_rate),
                ("positive_reply_rate", baseline.positive_reply_rate),
            ] {
                self.store
                    .upsert_baseline(
                        tenant_id,
                        metric,
                        "tenant",
                        PERIOD_30D,
                        value,
                        i64::try_from(baseline.sends).unwrap_or(i64::MAX),
                    )
                    .await?;
            }
            Ok(())
        })
        .await?;

        // 2. Discovery.
        ctx.run("discover-patterns", async {
            let candidates =
                patterns::discover_patterns(&tagged, &outcomes, baseline.reply_rate);
            let mut inserted = 0usize;
            for candidate in candidates {
                match self
                    .store
                    .find_pattern(tenant_id, &candidate.elements, &candidate.scope)
                    .await?
                {
                    Some(existing) => {
                        // Retired patterns stay retired; live ones get
                        // fresh stats.
                        if existing.status != PatternStatus::Retired {
                            self.store
                                .update_pattern(
                                    tenant_id,
                                    existing.id,
                                    candidate.sample_size,
                                    candidate.lift,
                                    candidate.confidence,
                                    existing.status,
                                )
                                .await?;
                        }
                    }
                    None => {
                        self.store
                            .insert_pattern(
                                tenant_id,
                                &candidate.elements,
                                &candidate.scope,
                                candidate.sample_size,
                                candidate.lift,
                                candidate.confidence,
                            )
                            .await?;
                        inserted = inserted.saturating_add(1);
                    }
                }
            }
            Ok(inserted)
        })
        .await?;

        // 3. Validation.
        ctx.run("validate-patterns", async {
            let candidates = self
                .store
                .list_patterns(tenant_id, Some(PatternStatus::Candidate))
                .await?;
            let mut validated = 0usize;
            for pattern in candidates {
                if patterns::meets_validation(pattern.sample_size, pattern.confidence, pattern.lift)
                {
                    self.store
                        .update_pattern(
                            tenant_id,
                            pattern.id,
                            pattern.sample_size,
                            pattern.lift,
                            pattern.confidence,
                            PatternStatus::Validated,
                        )
                        .await?;
                    validated = validated.saturating_add(1);
                }
            }
            Ok(validated)
        })
        .await?;

        // 4. Promotion: validated patterns gain a RAG document and go
        // active.
        let validated = self
            .store
            .list_patterns(tenant_id, Some(PatternStatus::Validated))
            .await?;
        for pattern in validated {
            let step = format!("promote-pattern-{}", pattern.id);
            let elements = pattern.elements.clone();
            let (lift, sample) = (pattern.lift, pattern.sample_size);
            ctx.run(&step, async {
                let (title, content) = self
                    .pattern_document(&tenant, &elements, lift, sample)
                    .await;
                self.store
                    .upsert_learned_document(tenant_id, pattern.id, &title, &content)
                    .await?;
                self.store
                    .update_pattern(
                        tenant_id,
                        pattern.id,
                        pattern.sample_size,
                        pattern.lift,
                        pattern.confidence,
                        PatternStatus::Active,
                    )
                    .await?;
                Ok(())
            })
            .await?;
        }

        // 5. Deprecation: decayed lift retires the pattern; its RAG
        // document is marked deprecated, not deleted.
        ctx.run("deprecate-patterns", async {
            let active = self
                .store
                .list_patterns(tenant_id, Some(PatternStatus::Active))
                .await?;
            let mut retired = 0usize;
            for pattern in active {
                if pattern.lift < patterns::RETIREMENT_LIFT {
                    self.store
                        .update_pattern(
                            tenant_id,
                            pattern.id,
                            pattern.sample_size,
                            pattern.lift,
                            pattern.confidence,
                            PatternStatus::Retired,
                        )
                        .await?;
                    self.store
                        .deprecate_learned_document(tenant_id, pattern.id)
                        .await?;
                    retired = retired.saturating_add(1);
                }
            }
            Ok(retired)
        })
        .await?;

        // 6. Prompt evolution.
        let all_patterns = self.store.list_patterns(tenant_id, None).await?;
        for prompt_name in prompts::EVOLVABLE_PROMPTS {
            let step = format!("evolve-{prompt_name}");
            ctx.run(&step, async {
                prompts::evolve_prompt(
                    &self.store,
                    &self.providers,
                    &tenant,
                    prompt_name,
                    &all_patterns,
                )
                .await
            })
            .await?;
        }

        // 7. A/B arbitration.
        let concluded = ctx
            .run("evaluate-ab-tests", async {
                prompts::evaluate_ab_tests(&self.store, &tenant).await
            })
            .await?;

        info!(
            tenant = tenant_id,
            sends = baseline.sends,
            reply_rate = baseline.reply_rate,
            ab_concluded = concluded,
            "learning run complete"
        );
        Ok(())
    }
}

/// Sends the per-tenant daily summary through the notifier.
pub struct DailySummaryHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
}

impl DailySummaryHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }
}

#[async_trait]
impl EventHandler for DailySummaryHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::DAILY_SUMMARY]
    }

    async fn handle(&self, _ctx: &StepContext, _payload: Value) -> Result<(), StageError> {
        let since = Utc::now()
            .checked_sub_signed(Duration::days(1))
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        for tenant in self.store.list_tenants().await? {
            let activity = self.store.tenant_activity_since(tenant.id, &since).await?;
            let payload = json!({
                "kind": "daily_summary",
                "tenant": tenant.name,
                "leads_ingested": activity.leads_ingested,
                "outreach_sent": activity.outreach_sent,
                "replies": activity.replies,
            });
            if let Err(err) = self
                .providers
                .notifier()
                .send(tenant.notify_channel.as_deref().unwrap_or("summaries"), &payload)
                .await
            {
                warn!(tenant = tenant.id, error = %err, "daily summary failed");
            }
        }
        Ok(())
    }
}
