//! Auditable content-element tagging heuristics.
//!
//! Every classifier is a small keyword/shape rule so a human can read a
//! tag and see exactly why it was assigned.

use crate::store::outreach::ElementTag;

/// Subject-line kinds.
const SUBJECT_TRIGGER_HINTS: &[&str] = &["congrats", "saw your", "noticed", "your recent", "re:"];

/// Opener classification hints, checked in order.
const OPENER_CONGRATS: &[&str] = &["congrat"];
const OPENER_TRIGGER: &[&str] = &["noticed", "saw your", "came across", "read about"];
const OPENER_MUTUAL: &[&str] = &["we both", "mutual", "fellow"];

/// Pain-point keyword buckets.
const PAIN_TIME: &[&str] = &["hours", "time-consuming", "manual", "tedious", "busywork"];
const PAIN_REVENUE: &[&str] = &["revenue", "pipeline", "quota", "bookings", "deals"];
const PAIN_COMPETITIVE: &[&str] = &["competitor", "falling behind", "market share", "losing to"];
const PAIN_SCALE: &[&str] = &["scale", "scaling", "growing", "headcount", "growth"];

/// CTA keyword buckets.
const CTA_MEETING: &[&str] = &["call", "meeting", "chat", "calendar", "minutes next week"];
const CTA_QUESTION: &[&str] = &["thoughts?", "open to", "worth exploring", "make sense?"];
const CTA_RESOURCE: &[&str] = &["guide", "case study", "teardown", "breakdown", "examples"];

/// Classify the subject line: question / trigger-based / direct.
pub fn classify_subject(subject: &str) -> &'static str {
    let lower = subject.to_lowercase();
    if lower.trim_end().ends_with('?') {
        return "question";
    }
    if SUBJECT_TRIGGER_HINTS.iter().any(|h| lower.contains(h)) {
        return "trigger_based";
    }
    "direct"
}

/// Classify the opener (first sentence of the body).
pub fn classify_opener(body: &str) -> &'static str {
    let first = first_sentence(body).to_lowercase();
    if OPENER_CONGRATS.iter().any(|h| first.contains(h)) {
        return "congratulation";
    }
    if OPENER_TRIGGER.iter().any(|h| first.contains(h)) {
        return "trigger_reference";
    }
    if OPENER_MUTUAL.iter().any(|h| first.contains(h)) {
        return "mutual";
    }
    if first.trim_end().ends_with('?') {
        return "question";
    }
    "direct"
}

/// Classify the pain point addressed, when one is recognizable.
pub fn classify_pain_point(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    for (bucket, name) in [
        (PAIN_TIME, "time"),
        (PAIN_REVENUE, "revenue"),
        (PAIN_COMPETITIVE, "competitive"),
        (PAIN_SCALE, "scale"),
    ] {
        if bucket.iter().any(|h| lower.contains(h)) {
            return Some(name);
        }
    }
    None
}

/// Classify the call to action.
pub fn classify_cta(body: &str) -> &'static str {
    let lower = body.to_lowercase();
    if CTA_MEETING.iter().any(|h| lower.contains(h)) {
        return "meeting";
    }
    if CTA_QUESTION.iter().any(|h| lower.contains(h)) {
        return "question";
    }
    if CTA_RESOURCE.iter().any(|h| lower.contains(h)) {
        return "resource";
    }
    "none"
}

/// Classify tone by contraction density: casual writing contracts.
pub fn classify_tone(body: &str) -> &'static str {
    let lower = body.to_lowercase();
    let contractions = ["n't", "'re", "'ll", "'ve", "i'm", "it's", "that's"]
        .iter()
        .map(|c| lower.matches(c).count())
        .sum::<usize>();
    if contractions >= 2 {
        "casual"
    } else {
        "formal"
    }
}

/// Bucket the body length by word count.
pub fn length_bucket(body: &str) -> &'static str {
    let words = body.split_whitespace().count();
    if words < 75 {
        "short"
    } else if words < 150 {
        "medium"
    } else {
        "long"
    }
}

fn first_sentence(body: &str) -> &str {
    let trimmed = body.trim_start();
    trimmed
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(trimmed)
}

/// Tag one outgoing email: subject kind, opener kind, pain point, CTA,
/// tone, and length bucket.
pub fn tag_email(subject: Option<&str>, body: &str) -> Vec<ElementTag> {
    let mut tags = Vec::new();
    if let Some(subject) = subject {
        tags.push(ElementTag {
            element_type: "subject_kind".to_owned(),
            element_value: classify_subject(subject).to_owned(),
            position_in_email: 0,
        });
    }
    tags.push(ElementTag {
        element_type: "opener_kind".to_owned(),
        element_value: classify_opener(body).to_owned(),
        position_in_email: 1,
    });
    if let Some(pain) = classify_pain_point(body) {
        tags.push(ElementTag {
            element_type: "pain_point_kind".to_owned(),
            element_value: pain.to_owned(),
            position_in_email: 2,
        });
    }
    tags.push(ElementTag {
        element_type: "cta_kind".to_owned(),
        element_value: classify_cta(body).to_owned(),
        position_in_email: 3,
    });
    tags.push(ElementTag {
        element_type: "tone".to_owned(),
        element_value: classify_tone(body).to_owned(),
        position_in_email: 4,
    });
    tags.push(ElementTag {
        element_type: "length_bucket".to_owned(),
        element_value: length_bucket(body).to_owned(),
        position_in_email: 5,
    });
    tags
}
