//! Send-time conditional-copy selection.

use serde_json::Value;

use cadence::orchestrator::copy::{
    custom_fields_for_remaining, select_connection_note, select_email_body, select_linkedin_body,
};
use cadence::types::orchestration::CrossChannelSignals;
use cadence::types::{EmailStep, EmailStepType, LinkedInStep, LinkedInStepType};

fn email_step(n: u32) -> EmailStep {
    EmailStep {
        step_number: n,
        day: n,
        step_type: EmailStepType::Initial,
        subject: format!("subject {n}"),
        body: format!("base {n}"),
        body_linkedin_connected: Some(format!("connected {n}")),
        body_linkedin_replied: Some(format!("replied {n}")),
        word_count: 2,
        trigger_linkedin: None,
        wait_for_linkedin: None,
    }
}

fn linkedin_step() -> LinkedInStep {
    LinkedInStep {
        step_number: 1,
        day: 1,
        step_type: LinkedInStepType::Message,
        connection_note: Some("Hi {{first_name}}".to_owned()),
        connection_note_fallback: Some("Hi there".to_owned()),
        body: Some("base".to_owned()),
        body_fallback: Some("fallback".to_owned()),
        body_email_opened: Some("opened variant".to_owned()),
        body_email_replied: Some("replied variant".to_owned()),
        requires_connection: true,
        trigger_email: None,
        wait_for_email: None,
    }
}

#[test]
fn email_base_body_without_signals() {
    let signals = CrossChannelSignals::default();
    assert_eq!(select_email_body(&email_step(1), &signals), "base 1");
}

#[test]
fn connected_beats_base_and_replied_beats_connected() {
    let step = email_step(2);
    let connected = CrossChannelSignals {
        linkedin_connected: true,
        ..CrossChannelSignals::default()
    };
    assert_eq!(select_email_body(&step, &connected), "connected 2");

    let replied = CrossChannelSignals {
        linkedin_connected: true,
        linkedin_replied: true,
        ..CrossChannelSignals::default()
    };
    assert_eq!(select_email_body(&step, &replied), "replied 2");
}

#[test]
fn missing_variant_falls_back_to_base() {
    let mut step = email_step(3);
    step.body_linkedin_connected = None;
    let connected = CrossChannelSignals {
        linkedin_connected: true,
        ..CrossChannelSignals::default()
    };
    assert_eq!(select_email_body(&step, &connected), "base 3");
}

#[test]
fn linkedin_selection_mirrors_email() {
    let step = linkedin_step();
    let opened = CrossChannelSignals {
        email_opened: true,
        ..CrossChannelSignals::default()
    };
    assert_eq!(
        select_linkedin_body(&step, &opened, true),
        Some("opened variant")
    );

    let replied = CrossChannelSignals {
        email_opened: true,
        email_replied: true,
        ..CrossChannelSignals::default()
    };
    assert_eq!(
        select_linkedin_body(&step, &replied, true),
        Some("replied variant")
    );
}

#[test]
fn missing_personalization_uses_fallbacks() {
    let step = linkedin_step();
    let signals = CrossChannelSignals::default();
    assert_eq!(select_linkedin_body(&step, &signals, false), Some("fallback"));
    assert_eq!(select_connection_note(&step, false), Some("Hi there"));
    assert_eq!(select_connection_note(&step, true), Some("Hi {{first_name}}"));
}

#[test]
fn sync_covers_only_unsent_steps() {
    let steps = vec![email_step(1), email_step(2), email_step(3)];
    let signals = CrossChannelSignals {
        linkedin_connected: true,
        ..CrossChannelSignals::default()
    };
    let fields = custom_fields_for_remaining(&steps, &signals, 1);
    let map = fields.as_object().expect("object");
    assert!(!map.contains_key("email_1_body"), "sent step must not change");
    assert_eq!(map["email_2_body"], Value::String("connected 2".to_owned()));
    assert_eq!(map["email_3_body"], Value::String("connected 3".to_owned()));
}
