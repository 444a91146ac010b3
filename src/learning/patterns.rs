//! Pattern discovery, validation, and lifecycle thresholds.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::store::outreach::TaggedOutreachRow;

use super::performance::{confidence_for_sample, Outcomes};

/// Minimum sends before a combination becomes a candidate.
pub const DISCOVERY_MIN_SAMPLE: usize = 20;
/// Minimum reply-rate lift for candidacy.
pub const DISCOVERY_MIN_LIFT: f64 = 1.2;
/// Validation thresholds: sample, confidence, lift.
pub const VALIDATION_MIN_SAMPLE: i64 = 50;
/// Minimum confidence to validate.
pub const VALIDATION_MIN_CONFIDENCE: f64 = 0.7;
/// Minimum lift to validate.
pub const VALIDATION_MIN_LIFT: f64 = 1.5;
/// Patterns whose lift decays below this retire.
pub const RETIREMENT_LIFT: f64 = 0.7;

/// A discovered element-combination candidate.
#[derive(Debug, Clone)]
pub struct CandidatePattern {
    /// The element pair, canonically ordered.
    pub elements: serde_json::Value,
    /// Scope (tenant-wide for discovered pairs).
    pub scope: serde_json::Value,
    /// Sends carrying the combination.
    pub sample_size: i64,
    /// Combination reply rate.
    pub reply_rate: f64,
    /// Lift over the tenant baseline reply rate.
    pub lift: f64,
    /// Sample confidence.
    pub confidence: f64,
}

/// Discover candidate patterns: element pairs co-occurring on the same
/// outreach whose reply rate lifts over the baseline.
pub fn discover_patterns(
    tagged: &[TaggedOutreachRow],
    outcomes: &HashMap<i64, Outcomes>,
    baseline_reply_rate: f64,
) -> Vec<CandidatePattern> {
    if baseline_reply_rate <= 0.0 {
        return Vec::new();
    }

    // Tags per outreach, deduped.
    let mut tags_by_outreach: HashMap<i64, Vec<(String, String)>> = HashMap::new();
    for row in tagged {
        let entry = tags_by_outreach.entry(row.outreach_id).or_default();
        let tag = (row.tag.element_type.clone(), row.tag.element_value.clone());
        if !entry.contains(&tag) {
            entry.push(tag);
        }
    }

    // Outreach ids per ordered pair.
    let mut by_pair: HashMap<((String, String), (String, String)), HashSet<i64>> = HashMap::new();
    for (outreach_id, tags) in &tags_by_outreach {
        let mut sorted = tags.clone();
        sorted.sort();
        for (i, first) in sorted.iter().enumerate() {
            for second in sorted.iter().skip(i.saturating_add(1)) {
                if first.0 == second.0 {
                    continue; // Same element type twice is not a combination.
                }
                by_pair
                    .entry((first.clone(), second.clone()))
                    .or_default()
                    .insert(*outreach_id);
            }
        }
    }

    let mut candidates: Vec<CandidatePattern> = by_pair
        .into_iter()
        .filter_map(|((first, second), outreach_ids)| {
            let sample = outreach_ids.len();
            if sample < DISCOVERY_MIN_SAMPLE {
                return None;
            }
            let replied = outreach_ids
                .iter()
                .filter(|id| outcomes.get(id).is_some_and(|o| o.replied))
                .count();
            #[allow(clippy::cast_precision_loss)]
            let reply_rate = replied as f64 / sample as f64;
            let lift = reply_rate / baseline_reply_rate;
            if lift < DISCOVERY_MIN_LIFT {
                return None;
            }
            Some(CandidatePattern {
                elements: json!([
                    {first.0.clone(): first.1.clone()},
                    {second.0.clone(): second.1.clone()},
                ]),
                scope: json!({}),
                sample_size: i64::try_from(sample).unwrap_or(i64::MAX),
                reply_rate,
                lift,
                confidence: confidence_for_sample(sample),
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.lift
            .partial_cmp(&a.lift)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

/// Whether a candidate meets the validation bar.
pub fn meets_validation(sample_size: i64, confidence: f64, lift: f64) -> bool {
    sample_size >= VALIDATION_MIN_SAMPLE
        && confidence >= VALIDATION_MIN_CONFIDENCE
        && lift >= VALIDATION_MIN_LIFT
}

/// Templated RAG document for a pattern (LLM fallback).
pub fn render_pattern_document(
    elements: &serde_json::Value,
    lift: f64,
    sample_size: i64,
) -> (String, String) {
    let combo = elements
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.as_object().and_then(|map| {
                        map.iter()
                            .next()
                            .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or("?")))
                    })
                })
                .collect::<Vec<_>>()
                .join(" + ")
        })
        .unwrap_or_else(|| "unknown combination".to_owned());
    let title = format!("Winning pattern: {combo}");
    let content = format!(
        "Emails combining {combo} replied {lift:.1}x the account baseline over {sample_size} \
         sends in the last 30 days. Prefer this combination where the persona and step allow."
    );
    (title, content)
}
