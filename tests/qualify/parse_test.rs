//! Qualifier verdict parsing and coercion policy.

use cadence::qualify::parse_qualification;
use cadence::types::QualificationDecision;

#[test]
fn clean_json_parses() {
    let verdict = parse_qualification(
        r#"{"decision": "YES", "confidence": 0.9, "reasoning": "ICP fit", "icp_fit": "strong"}"#,
    );
    assert_eq!(verdict.decision, QualificationDecision::Yes);
    assert_eq!(verdict.confidence, 0.9);
    assert_eq!(verdict.icp_fit.as_deref(), Some("strong"));
}

#[test]
fn fenced_json_parses() {
    let verdict = parse_qualification(
        "Here is my analysis:\n```json\n{\"decision\": \"NO\", \"confidence\": 0.8, \
         \"reasoning\": \"wrong industry\"}\n```",
    );
    assert_eq!(verdict.decision, QualificationDecision::No);
}

#[test]
fn prose_coerces_to_review_at_half_confidence() {
    let verdict = parse_qualification("This lead seems promising overall.");
    assert_eq!(verdict.decision, QualificationDecision::Review);
    assert_eq!(verdict.confidence, 0.5);
}

#[test]
fn low_confidence_yes_coerces_to_no() {
    let verdict =
        parse_qualification(r#"{"decision": "YES", "confidence": 0.2, "reasoning": "thin"}"#);
    assert_eq!(verdict.decision, QualificationDecision::No);
}

#[test]
fn missing_decision_defaults_to_review() {
    let verdict = parse_qualification(r#"{"confidence": 0.7, "reasoning": "unsure"}"#);
    assert_eq!(verdict.decision, QualificationDecision::Review);
}

#[test]
fn out_of_range_confidence_clamps() {
    let verdict =
        parse_qualification(r#"{"decision": "YES", "confidence": 1.7, "reasoning": "sure"}"#);
    assert_eq!(verdict.confidence, 1.0);
    assert_eq!(verdict.decision, QualificationDecision::Yes);
}
