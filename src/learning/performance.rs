//! Element-performance aggregation over the trailing window.

use std::collections::{HashMap, HashSet};

use crate::store::outreach::{EngagementRow, TaggedOutreachRow};
use crate::store::patterns::ElementPerformanceRow;
use crate::types::Sentiment;

/// Aggregation period label for the trailing window.
pub const PERIOD_30D: &str = "30d";

/// Confidence saturates around this sample size.
const CONFIDENCE_SATURATION: f64 = 500.0;

/// Engagement outcomes folded per outreach event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outcomes {
    /// Any open.
    pub opened: bool,
    /// Any reply.
    pub replied: bool,
    /// Any positive reply.
    pub positive_reply: bool,
    /// Any bounce.
    pub bounced: bool,
    /// Any unsubscribe.
    pub unsubscribed: bool,
}

/// Fold engagement rows into per-outreach outcomes.
pub fn outcomes_by_outreach(engagements: &[EngagementRow]) -> HashMap<i64, Outcomes> {
    let mut map: HashMap<i64, Outcomes> = HashMap::new();
    for row in engagements {
        let entry = map.entry(row.outreach_event_id).or_default();
        match row.event_type.as_str() {
            "open" => entry.opened = true,
            "reply" => {
                entry.replied = true;
                if row.sentiment == Some(Sentiment::Positive) {
                    entry.positive_reply = true;
                }
            }
            "positive_reply" | "meeting_booked" => {
                entry.replied = true;
                entry.positive_reply = true;
            }
            "bounce" => entry.bounced = true,
            "unsubscribe" => entry.unsubscribed = true,
            _ => {}
        }
    }
    map
}

/// Sample-size confidence, saturating around 500 sends.
pub fn confidence_for_sample(sample: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = sample as f64;
    (n / CONFIDENCE_SATURATION).sqrt().min(1.0)
}

/// Compute per-(element, value) aggregates from tagged outreach and
/// engagement outcomes.
pub fn compute_element_performance(
    tagged: &[TaggedOutreachRow],
    outcomes: &HashMap<i64, Outcomes>,
) -> Vec<ElementPerformanceRow> {
    // Outreach ids per element.
    let mut by_element: HashMap<(String, String), HashSet<i64>> = HashMap::new();
    for row in tagged {
        by_element
            .entry((row.tag.element_type.clone(), row.tag.element_value.clone()))
            .or_default()
            .insert(row.outreach_id);
    }

    let mut rows: Vec<ElementPerformanceRow> = by_element
        .into_iter()
        .map(|((element_type, element_value), outreach_ids)| {
            let sample = outreach_ids.len();
            let mut opened = 0usize;
            let mut replied = 0usize;
            let mut positive = 0usize;
            let mut bounced = 0usize;
            let mut unsubscribed = 0usize;
            for id in &outreach_ids {
                let Some(outcome) = outcomes.get(id) else { continue };
                opened = opened.saturating_add(usize::from(outcome.opened));
                replied = replied.saturating_add(usize::from(outcome.replied));
                positive = positive.saturating_add(usize::from(outcome.positive_reply));
                bounced = bounced.saturating_add(usize::from(outcome.bounced));
                unsubscribed = unsubscribed.saturating_add(usize::from(outcome.unsubscribed));
            }
            ElementPerformanceRow {
                element_type,
                element_value,
                scope: serde_json::json!({}),
                period: PERIOD_30D.to_owned(),
                times_used: i64::try_from(sample).unwrap_or(i64::MAX),
                open_rate: rate(opened, sample),
                reply_rate: rate(replied, sample),
                positive_reply_rate: rate(positive, sample),
                bounce_rate: rate(bounced, sample),
                unsubscribe_rate: rate(unsubscribed, sample),
                confidence: confidence_for_sample(sample),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        (a.element_type.as_str(), a.element_value.as_str())
            .cmp(&(b.element_type.as_str(), b.element_value.as_str()))
    });
    rows
}

/// Tenant-wide baseline rates over the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineRates {
    /// Distinct sends in the window.
    pub sends: usize,
    /// Opens / sends.
    pub open_rate: f64,
    /// Replies / sends.
    pub reply_rate: f64,
    /// Positive replies / sends.
    pub positive_reply_rate: f64,
}

/// Compute tenant-wide baseline rates from the window's tagged sends.
pub fn compute_baseline(
    tagged: &[TaggedOutreachRow],
    outcomes: &HashMap<i64, Outcomes>,
) -> BaselineRates {
    let sends: HashSet<i64> = tagged.iter().map(|r| r.outreach_id).collect();
    let total = sends.len();
    let mut opened = 0usize;
    let mut replied = 0usize;
    let mut positive = 0usize;
    for id in &sends {
        let Some(outcome) = outcomes.get(id) else { continue };
        opened = opened.saturating_add(usize::from(outcome.opened));
        replied = replied.saturating_add(usize::from(outcome.replied));
        positive = positive.saturating_add(usize::from(outcome.positive_reply));
    }
    BaselineRates {
        sends: total,
        open_rate: rate(opened, total),
        reply_rate: rate(replied, total),
        positive_reply_rate: rate(positive, total),
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64 / total as f64;
    value
}
