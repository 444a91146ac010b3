//! Firmographic intent scoring.

use cadence::scoring::{intent_score, parse_revenue_millions, IntentTier};
use cadence::types::tenant::{PreferenceField, PreferenceWeight, TargetingPreferences};
use cadence::types::NormalizedLead;

fn strong_lead() -> NormalizedLead {
    NormalizedLead {
        email: Some("vp@acme.io".to_owned()),
        first_name: Some("Dana".to_owned()),
        last_name: Some("Ortiz".to_owned()),
        job_title: Some("VP of Sales".to_owned()),
        company_name: Some("Acme".to_owned()),
        company_industry: Some("SaaS".to_owned()),
        company_employee_count: Some(200),
        company_revenue: Some("$50M".to_owned()),
        ..NormalizedLead::default()
    }
}

#[test]
fn strong_lead_scores_strong_tier() {
    let score = intent_score(&strong_lead(), None);
    assert!(score.total >= 70, "expected strong, got {}", score.total);
    assert_eq!(score.tier, IntentTier::Strong);
}

#[test]
fn total_is_clamped_to_100() {
    let score = intent_score(&strong_lead(), None);
    assert!(score.total <= 100);
}

#[test]
fn total_equals_component_sum_after_clamp() {
    let score = intent_score(&strong_lead(), None);
    let sum = score.breakdown.sum().clamp(0.0, 100.0).round();
    assert_eq!(f64::from(score.total), sum);
}

#[test]
fn empty_lead_scores_zeroish() {
    let score = intent_score(&NormalizedLead::default(), None);
    assert_eq!(score.tier, IntentTier::Weak);
    assert!(score.total < 40);
}

#[test]
fn disqualifier_title_zeroes_the_title_component() {
    let mut lead = strong_lead();
    lead.job_title = Some("Sales Intern".to_owned());
    let score = intent_score(&lead, None);
    assert_eq!(score.breakdown.title, 0.0);
}

#[test]
fn preference_weight_above_one_adds_points() {
    let lead = strong_lead();
    let base = intent_score(&lead, None);
    let preferences = TargetingPreferences {
        weights: vec![PreferenceWeight {
            field: PreferenceField::Industry,
            matches: "saas".to_owned(),
            weight: 1.5,
        }],
    };
    let weighted = intent_score(&lead, Some(&preferences));
    assert!(weighted.breakdown.preference_adjustment > 0.0);
    assert!(weighted.total >= base.total);
}

#[test]
fn preference_weight_below_one_subtracts_points() {
    let lead = strong_lead();
    let preferences = TargetingPreferences {
        weights: vec![PreferenceWeight {
            field: PreferenceField::Industry,
            matches: "saas".to_owned(),
            weight: 0.5,
        }],
    };
    let weighted = intent_score(&lead, Some(&preferences));
    assert!(weighted.breakdown.preference_adjustment < 0.0);
}

#[test]
fn neutral_weight_changes_nothing() {
    let lead = strong_lead();
    let preferences = TargetingPreferences {
        weights: vec![PreferenceWeight {
            field: PreferenceField::Industry,
            matches: "saas".to_owned(),
            weight: 1.0,
        }],
    };
    let weighted = intent_score(&lead, Some(&preferences));
    assert_eq!(weighted.breakdown.preference_adjustment, 0.0);
}

#[test]
fn revenue_parses_ranges_and_suffixes() {
    assert_eq!(parse_revenue_millions("$10M-$50M"), Some(30.0));
    assert_eq!(parse_revenue_millions("500K"), Some(0.5));
    assert_eq!(parse_revenue_millions("2B"), Some(2000.0));
    assert_eq!(parse_revenue_millions("250"), Some(250.0));
    assert_eq!(parse_revenue_millions(""), None);
    assert_eq!(parse_revenue_millions("lots"), None);
}

#[test]
fn scoring_is_deterministic() {
    let lead = strong_lead();
    let first = intent_score(&lead, None);
    let second = intent_score(&lead, None);
    assert_eq!(first.total, second.total);
    assert_eq!(first.breakdown, second.breakdown);
}
