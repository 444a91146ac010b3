//! Prompt evolution and A/B arbitration.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::providers::{ChatMessage, ChatRequest, ProviderRegistry};
use crate::runner::StageError;
use crate::store::patterns::{LearnedPattern, PatternStatus};
use crate::store::prompts::PromptVersionStatus;
use crate::store::Store;
use crate::types::Tenant;

/// Prompts the learning loop may evolve.
pub const EVOLVABLE_PROMPTS: &[&str] = &["sequence-writer", "qualification"];

/// A/B defaults for evolved prompts.
const AB_MIN_SAMPLE: i64 = 100;
/// Wall-clock cap on evolved-prompt tests.
const AB_MAX_RUNTIME_DAYS: i64 = 30;
/// Required relative positive-reply margin to declare a winner.
const AB_WIN_MARGIN: f64 = 0.10;

/// Evolve one prompt: diff injected patterns against the current
/// validated/active set; when it changed, produce a new version and put
/// it under test (or activate directly when nothing is active yet).
pub async fn evolve_prompt(
    store: &Store,
    providers: &Arc<ProviderRegistry>,
    tenant: &Tenant,
    prompt_name: &str,
    patterns: &[LearnedPattern],
) -> Result<bool, StageError> {
    let target: HashSet<i64> = patterns
        .iter()
        .filter(|p| matches!(p.status, PatternStatus::Validated | PatternStatus::Active))
        .map(|p| p.id)
        .collect();

    let active = store.active_prompt_version(tenant.id, prompt_name).await?;
    let injected: HashSet<i64> = active
        .as_ref()
        .map(|v| v.injected_patterns.iter().copied().collect())
        .unwrap_or_default();

    if target == injected {
        return Ok(false);
    }
    if target.is_empty() && active.is_none() {
        return Ok(false);
    }

    // A new version is only worth minting once per diff; a running test
    // means the previous diff is still being arbitrated.
    if store.running_ab_test(tenant.id, prompt_name).await?.is_some() {
        info!(prompt = prompt_name, "A/B test running; deferring evolution");
        return Ok(false);
    }

    let added: Vec<&LearnedPattern> = patterns
        .iter()
        .filter(|p| target.contains(&p.id) && !injected.contains(&p.id))
        .collect();
    let removed: Vec<i64> = injected.difference(&target).copied().collect();

    let base_body = active.as_ref().map_or_else(
        || default_prompt_body(prompt_name),
        |v| v.body.clone(),
    );
    let body = generate_evolved_body(providers, tenant, prompt_name, &base_body, &added, &removed)
        .await?;

    let injected_list: Vec<i64> = {
        let mut list: Vec<i64> = target.iter().copied().collect();
        list.sort_unstable();
        list
    };
    let new_version = store
        .insert_prompt_version(
            tenant.id,
            prompt_name,
            &body,
            PromptVersionStatus::Testing,
            &injected_list,
        )
        .await?;

    match active {
        Some(active) => {
            store
                .create_ab_test(
                    tenant.id,
                    prompt_name,
                    active.id,
                    new_version.id,
                    AB_MIN_SAMPLE,
                    AB_MAX_RUNTIME_DAYS,
                )
                .await?;
            info!(
                prompt = prompt_name,
                control = active.id,
                variant = new_version.id,
                "A/B test opened for evolved prompt"
            );
        }
        None => {
            store
                .activate_prompt_version(tenant.id, prompt_name, new_version.id)
                .await?;
            info!(prompt = prompt_name, version = new_version.id, "first version activated");
        }
    }
    Ok(true)
}

async fn generate_evolved_body(
    providers: &Arc<ProviderRegistry>,
    tenant: &Tenant,
    prompt_name: &str,
    base_body: &str,
    added: &[&LearnedPattern],
    removed: &[i64],
) -> Result<String, StageError> {
    let mut instructions = String::new();
    instructions.push_str(&format!(
        "Rewrite this {prompt_name} prompt. Integrate the new winning patterns and drop the \
         deprecated ones. Keep structure and intent; change only what the patterns demand.\n\n\
         ## Current prompt\n{base_body}\n\n## New patterns\n"
    ));
    for pattern in added {
        instructions.push_str(&format!(
            "- {} (lift {:.1}x over {} sends)\n",
            pattern.elements, pattern.lift, pattern.sample_size
        ));
    }
    if !removed.is_empty() {
        instructions.push_str(&format!(
            "\n## Deprecated pattern ids to remove\n{removed:?}\n"
        ));
    }
    instructions.push_str("\nRespond with the full rewritten prompt text only.");

    let llm = providers.llm_for_tenant(tenant).map_err(StageError::from)?;
    let response = llm
        .chat(ChatRequest {
            system: Some("You maintain production prompt templates.".to_owned()),
            messages: vec![ChatMessage::user(instructions)],
            max_tokens: Some(4_000),
            temperature: Some(0.3),
            thinking_budget: None,
        })
        .await
        .map_err(StageError::from)?;

    if response.content.trim().is_empty() {
        return Err(StageError::transient("prompt evolution returned empty body"));
    }
    Ok(response.content)
}

fn default_prompt_body(prompt_name: &str) -> String {
    match prompt_name {
        "qualification" => "Judge the lead against the account criteria and respond with the \
                            JSON verdict."
            .to_owned(),
        _ => "Write the outbound sequence for the lead using the brand voice, the research \
              triggers, and the timeline."
            .to_owned(),
    }
}

/// Evaluate running A/B tests: conclude on sample or runtime, promote
/// the winner, keep control on inconclusive, deprecate the loser.
pub async fn evaluate_ab_tests(store: &Store, tenant: &Tenant) -> Result<usize, StageError> {
    let tests = store.list_running_ab_tests(tenant.id).await?;
    let now = Utc::now();
    let mut concluded = 0usize;

    for test in tests {
        let control = store
            .prompt_version_stats(tenant.id, test.control_version_id, test.started_at)
            .await?;
        let variant = store
            .prompt_version_stats(tenant.id, test.variant_version_id, test.started_at)
            .await?;

        let sample_reached =
            control.sends >= test.min_sample_per_variant && variant.sends >= test.min_sample_per_variant;
        let expired = now.signed_duration_since(test.started_at)
            >= Duration::days(test.max_runtime_days);
        if !sample_reached && !expired {
            continue;
        }

        let control_rate = positive_rate(control.positive_replies, control.sends);
        let variant_rate = positive_rate(variant.positive_replies, variant.sends);

        // The relative margin only means something once the winning arm
        // produced a positive reply; a tie at zero is inconclusive.
        let winner = if variant_rate > 0.0 && variant_rate >= control_rate * (1.0 + AB_WIN_MARGIN)
        {
            Some(test.variant_version_id)
        } else if control_rate > 0.0 && control_rate >= variant_rate * (1.0 + AB_WIN_MARGIN) {
            Some(test.control_version_id)
        } else {
            None
        };

        match winner {
            Some(winner_id) => {
                let loser_id = if winner_id == test.control_version_id {
                    test.variant_version_id
                } else {
                    test.control_version_id
                };
                store
                    .activate_prompt_version(tenant.id, &test.prompt_name, winner_id)
                    .await?;
                store.deprecate_prompt_version(tenant.id, loser_id).await?;
                store.conclude_ab_test(tenant.id, test.id, Some(winner_id)).await?;
                info!(
                    prompt = %test.prompt_name,
                    winner = winner_id,
                    control_rate,
                    variant_rate,
                    "A/B test concluded with a winner"
                );
            }
            None => {
                // Inconclusive: control stays, the variant retires.
                store
                    .deprecate_prompt_version(tenant.id, test.variant_version_id)
                    .await?;
                store.conclude_ab_test(tenant.id, test.id, None).await?;
                warn!(
                    prompt = %test.prompt_name,
                    control_rate,
                    variant_rate,
                    "A/B test inconclusive; control retained"
                );
            }
        }

        concluded = concluded.saturating_add(1);
    }
    Ok(concluded)
}

fn positive_rate(positives: i64, sends: i64) -> f64 {
    if sends <= 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let value = positives as f64 / sends as f64;
    value
}
