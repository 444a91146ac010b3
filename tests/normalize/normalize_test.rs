//! Source-dispatched normalization.

use serde_json::json;

use cadence::normalize::{normalize, normalize_revenue, parse_employee_count};
use cadence::types::LeadSource;

#[test]
fn pixel_record_maps_canonical_fields() {
    let raw = json!({
        "email": "alice@acme.io",
        "first_name": "Alice",
        "last_name": "Zhou",
        "job_title": "VP Marketing",
        "company": "Acme",
        "company_employee_count": 120,
        "company_industry": "retail",
        "page": "/pricing",
        "time_on_page": 45000,
    });
    let lead = normalize(&raw, LeadSource::Pixel);
    assert_eq!(lead.email.as_deref(), Some("alice@acme.io"));
    assert_eq!(lead.company_name.as_deref(), Some("Acme"));
    assert_eq!(lead.company_employee_count, Some(120));
    assert_eq!(lead.page.as_deref(), Some("/pricing"));
    assert_eq!(lead.dwell_ms, Some(45000));
    assert!(lead.has_required_fields());
}

#[test]
fn apollo_combined_name_splits() {
    let raw = json!({
        "email": "bo@apex.dev",
        "name": "Bo Larsen",
        "organization_name": "Apex",
        "title": "CTO",
    });
    let lead = normalize(&raw, LeadSource::Apollo);
    assert_eq!(lead.first_name.as_deref(), Some("Bo"));
    assert_eq!(lead.last_name.as_deref(), Some("Larsen"));
    assert_eq!(lead.company_name.as_deref(), Some("Apex"));
    assert_eq!(lead.job_title.as_deref(), Some("CTO"));
}

#[test]
fn whitespace_only_values_become_none() {
    let raw = json!({"email": "   ", "company": "Acme", "job_title": ""});
    let lead = normalize(&raw, LeadSource::Manual);
    assert!(lead.email.is_none());
    assert!(lead.job_title.is_none());
    assert!(!lead.has_required_fields());
}

#[test]
fn employee_ranges_collapse_to_midpoint() {
    let raw = json!({"email": "x@y.z", "company": "Y", "employee_count": "50-100"});
    let lead = normalize(&raw, LeadSource::Intent);
    assert_eq!(lead.company_employee_count, Some(75));
}

#[test]
fn revenue_normalizes_to_canonical_form() {
    assert_eq!(normalize_revenue("$10M-$50M").as_deref(), Some("$30M"));
    assert_eq!(normalize_revenue("750k").as_deref(), Some("$750K"));
    assert_eq!(normalize_revenue("1.5B").as_deref(), Some("$1.5B"));
    assert_eq!(normalize_revenue("garbage"), None);
}

#[test]
fn employee_count_parses_suffixes_and_plain() {
    assert_eq!(parse_employee_count("1.2k"), Some(1200));
    assert_eq!(parse_employee_count("230"), Some(230));
    assert_eq!(parse_employee_count(""), None);
    assert_eq!(parse_employee_count("many"), None);
}

#[test]
fn normalize_is_idempotent_for_every_source() {
    let raw = json!({
        "email": "alice@acme.io",
        "first_name": "Alice",
        "company": "Acme Corp",
        "employee_count": "11-50",
        "revenue": "$5M",
        "page": "/demo",
    });
    for source in [
        LeadSource::Pixel,
        LeadSource::Intent,
        LeadSource::Apollo,
        LeadSource::Manual,
    ] {
        let once = normalize(&raw, source);
        let round = serde_json::to_value(&once).expect("serializes");
        let twice = normalize(&round, source);
        assert_eq!(once, twice, "normalize must be idempotent for {source:?}");
    }
}
