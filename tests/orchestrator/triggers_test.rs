//! Trigger-condition grammar evaluation.

use cadence::orchestrator::triggers::{evaluate, first_match};
use cadence::types::orchestration::{ChannelArm, CrossChannelSignals};
use cadence::types::{
    CampaignMode, Channel, CrossChannelTrigger, OrchestrationState, OrchestrationStatus,
    Sentiment, TriggerAction, TriggerCondition,
};

fn state() -> OrchestrationState {
    OrchestrationState {
        id: 1,
        tenant_id: 1,
        lead_id: 1,
        sequence_id: 1,
        campaign_id: 1,
        mode: CampaignMode::MultiChannel,
        email: ChannelArm {
            step_current: 2,
            step_total: 7,
            ..ChannelArm::default()
        },
        linkedin: ChannelArm::default(),
        signals: CrossChannelSignals {
            email_opened: true,
            email_opened_count: 3,
            linkedin_connected: true,
            email_reply_sentiment: Some(Sentiment::Positive),
            ..CrossChannelSignals::default()
        },
        status: OrchestrationStatus::Active,
        waiting_for: None,
        waiting_since: None,
        waiting_timeout_at: None,
        stop_reason: None,
        version: 0,
    }
}

fn rule(priority: i64, conditions: Vec<TriggerCondition>) -> CrossChannelTrigger {
    CrossChannelTrigger {
        id: priority,
        tenant_id: Some(1),
        source_channel: Channel::Email,
        source_event: "email_opened".to_owned(),
        conditions,
        target_action: TriggerAction::Alert {
            message: format!("rule {priority}"),
        },
        priority,
    }
}

#[test]
fn sentiment_equality() {
    let state = state();
    assert!(evaluate(
        &TriggerCondition::SentimentIs {
            field: "email_reply_sentiment".to_owned(),
            expected: Sentiment::Positive,
        },
        &state
    ));
    assert!(!evaluate(
        &TriggerCondition::SentimentIs {
            field: "linkedin_reply_sentiment".to_owned(),
            expected: Sentiment::Positive,
        },
        &state
    ));
}

#[test]
fn count_bounds() {
    let state = state();
    assert!(evaluate(
        &TriggerCondition::CountAtLeast {
            field: "email_opened_count".to_owned(),
            n: 3,
        },
        &state
    ));
    assert!(!evaluate(
        &TriggerCondition::CountAtLeast {
            field: "email_opened_count".to_owned(),
            n: 4,
        },
        &state
    ));
    assert!(evaluate(
        &TriggerCondition::CountAtMost {
            field: "email_step_current".to_owned(),
            n: 2,
        },
        &state
    ));
}

#[test]
fn flag_presence() {
    let state = state();
    assert!(evaluate(
        &TriggerCondition::FlagSet {
            field: "linkedin_connected".to_owned(),
        },
        &state
    ));
    assert!(evaluate(
        &TriggerCondition::FlagClear {
            field: "email_replied".to_owned(),
        },
        &state
    ));
}

#[test]
fn unknown_fields_never_match() {
    let state = state();
    assert!(!evaluate(
        &TriggerCondition::FlagSet {
            field: "nonexistent".to_owned(),
        },
        &state
    ));
    assert!(!evaluate(
        &TriggerCondition::CountAtLeast {
            field: "nonexistent".to_owned(),
            n: 0,
        },
        &state
    ));
}

#[test]
fn first_matching_rule_wins_by_priority_order() {
    let state = state();
    let rules = vec![
        rule(
            1,
            vec![TriggerCondition::CountAtLeast {
                field: "email_opened_count".to_owned(),
                n: 10,
            }],
        ),
        rule(2, vec![]),
        rule(3, vec![]),
    ];
    let matched = first_match(&rules, &state, Channel::Email, "email_opened")
        .expect("a rule should match");
    assert_eq!(matched.priority, 2);
}

#[test]
fn rules_for_other_events_are_skipped() {
    let state = state();
    let rules = vec![rule(1, vec![])];
    assert!(first_match(&rules, &state, Channel::Linkedin, "email_opened").is_none());
    assert!(first_match(&rules, &state, Channel::Email, "email_clicked").is_none());
}
