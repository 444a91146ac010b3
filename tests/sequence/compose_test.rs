//! Prompt composition and generator-output parsing.

use cadence::research::{
    ContextProfile, MatchedTrigger, PersonaMatch, PersonaMatchLevel, RelationshipType,
};
use cadence::sequence::compose::{compose_prompt, GenerationInput, RevisionContext};
use cadence::sequence::parse_generated;
use cadence::types::{
    Brand, Campaign, CampaignMode, CampaignStatus, DataSourceKind, Lead, LeadSource, LeadStatus,
};
use chrono::Utc;

fn lead() -> Lead {
    Lead {
        id: 1,
        tenant_id: 1,
        campaign_id: Some(1),
        email: "dana@apex.dev".to_owned(),
        first_name: Some("Dana".to_owned()),
        last_name: Some("Ortiz".to_owned()),
        job_title: Some("VP Sales".to_owned()),
        linkedin_url: None,
        phone: None,
        company_name: Some("Apex".to_owned()),
        company_domain: None,
        company_industry: Some("SaaS".to_owned()),
        company_employee_count: Some(120),
        company_revenue: None,
        source: LeadSource::Intent,
        visit_count: 0,
        first_seen_at: Utc::now(),
        last_seen_at: Utc::now(),
        in_email_system: false,
        in_linkedin_system: false,
        status: LeadStatus::Researched,
        qualification_decision: None,
        qualification_confidence: None,
        qualification_reasoning: None,
        icp_fit: None,
        intent_score: None,
        intent_tier: None,
        version: 0,
    }
}

fn campaign() -> Campaign {
    Campaign {
        id: 1,
        tenant_id: 1,
        brand_id: 1,
        name: "Q3 outbound".to_owned(),
        status: CampaignStatus::Active,
        mode: CampaignMode::MultiChannel,
        data_source_kind: DataSourceKind::Intent,
        data_source_config: serde_json::json!({}),
        email_step_count: 7,
        linkedin_step_count: 4,
        wait_for_connection: true,
        connection_timeout_hours: 72,
        linkedin_first: false,
        custom_instructions: Some("Mention the integration marketplace.".to_owned()),
        leads_ingested: 0,
        leads_contacted: 0,
        leads_replied: 0,
        leads_converted: 0,
        last_ingested_at: None,
    }
}

fn brand() -> Brand {
    Brand {
        id: 1,
        tenant_id: 1,
        name: "Apex".to_owned(),
        voice: Some("direct, warm".to_owned()),
        value_proposition: Some("Cut manual outreach work".to_owned()),
        differentiators: vec!["native CRM sync".to_owned()],
        icp: None,
    }
}

fn profile() -> ContextProfile {
    ContextProfile {
        persona_match: PersonaMatch {
            persona: Some("Sales leader".to_owned()),
            level: PersonaMatchLevel::Exact,
            confidence: 0.9,
        },
        triggers: vec![MatchedTrigger {
            name: "recent funding".to_owned(),
            source: "web".to_owned(),
            matches: 3,
            confidence: 1.0,
            impact: 0.8,
            recency: 0.5,
            relevance: 1.0,
            total: 0.82,
        }],
        company_intel: None,
        relationship: RelationshipType::ColdOutreach,
        angles: vec!["Lead with recent funding".to_owned()],
    }
}

#[test]
fn prompt_carries_campaign_brand_and_research_context() {
    let lead = lead();
    let campaign = campaign();
    let brand = brand();
    let profile = profile();
    let input = GenerationInput {
        lead: &lead,
        profile: &profile,
        campaign: &campaign,
        brand: &brand,
        icp: None,
        fundamentals: "### Opening lines\nKeep them short.",
        prompt_body: Some("EVOLVED PROMPT HEADER"),
        revision: None,
    };
    let prompt = compose_prompt(&input);

    assert!(prompt.starts_with("EVOLVED PROMPT HEADER"));
    assert!(prompt.contains("Mention the integration marketplace."));
    assert!(prompt.contains("direct, warm"));
    assert!(prompt.contains("recent funding"));
    assert!(prompt.contains("timeout 72h"));
    assert!(prompt.contains("Day 21"));
    assert!(prompt.contains("body_linkedin_connected"));
    assert!(prompt.contains("Respond with JSON only"));
}

#[test]
fn revision_context_appends_instructions_and_previous_draft() {
    let lead = lead();
    let campaign = campaign();
    let brand = brand();
    let profile = profile();
    let input = GenerationInput {
        lead: &lead,
        profile: &profile,
        campaign: &campaign,
        brand: &brand,
        icp: None,
        fundamentals: "",
        prompt_body: None,
        revision: Some(RevisionContext {
            instructions: "Shorten email 2 to 60 words.",
            previous: "{\"email_steps\": []}",
        }),
    };
    let prompt = compose_prompt(&input);
    assert!(prompt.contains("Shorten email 2 to 60 words."));
    assert!(prompt.contains("Previous draft"));
}

#[test]
fn generated_steps_parse_with_variants() {
    let raw = r#"{
        "email_steps": [{
            "step_number": 1, "day": 1, "step_type": "initial",
            "subject": "Congrats on the round",
            "body": "Saw the announcement.",
            "body_linkedin_connected": "Great connecting here too.",
            "body_linkedin_replied": "Following up on our chat."
        }],
        "linkedin_steps": [{
            "step_number": 1, "day": 1, "step_type": "connection_request",
            "connection_note": "Hi {{first_name}}",
            "connection_note_fallback": "Hi there",
            "requires_connection": false
        }],
        "strategy": {
            "primary_angle": "funding", "tone": "warm",
            "wait_for_connection": true, "connection_timeout_hours": 72
        }
    }"#;
    let sequence = parse_generated(raw).expect("parse");
    assert_eq!(sequence.email_steps.len(), 1);
    assert!(sequence.email_steps[0].body_linkedin_connected.is_some());
    assert_eq!(
        sequence.linkedin_steps[0].connection_note_fallback.as_deref(),
        Some("Hi there")
    );
    assert!(sequence.strategy.wait_for_connection);
}
