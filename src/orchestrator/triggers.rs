//! Trigger-condition evaluation over orchestration state.

use crate::types::{Channel, CrossChannelTrigger, OrchestrationState, TriggerCondition};

/// The first enabled rule (priority order) matching the event whose
/// conditions all pass on the post-event state.
pub fn first_match<'a>(
    rules: &'a [CrossChannelTrigger],
    state: &OrchestrationState,
    channel: Channel,
    event_type: &str,
) -> Option<&'a CrossChannelTrigger> {
    rules
        .iter()
        .filter(|rule| rule.source_channel == channel && rule.source_event == event_type)
        .find(|rule| rule.conditions.iter().all(|c| evaluate(c, state)))
}

/// Evaluate one condition from the restricted grammar.
pub fn evaluate(condition: &TriggerCondition, state: &OrchestrationState) -> bool {
    match condition {
        TriggerCondition::SentimentIs { field, expected } => {
            sentiment_field(state, field) == Some(*expected)
        }
        TriggerCondition::CountAtLeast { field, n } => {
            counter_field(state, field).is_some_and(|v| v >= *n)
        }
        TriggerCondition::CountAtMost { field, n } => {
            counter_field(state, field).is_some_and(|v| v <= *n)
        }
        TriggerCondition::FlagSet { field } => flag_field(state, field) == Some(true),
        TriggerCondition::FlagClear { field } => flag_field(state, field) == Some(false),
    }
}

fn sentiment_field(
    state: &OrchestrationState,
    field: &str,
) -> Option<crate::types::Sentiment> {
    match field {
        "email_reply_sentiment" => state.signals.email_reply_sentiment,
        "linkedin_reply_sentiment" => state.signals.linkedin_reply_sentiment,
        _ => None,
    }
}

fn counter_field(state: &OrchestrationState, field: &str) -> Option<u32> {
    match field {
        "email_opened_count" => Some(state.signals.email_opened_count),
        "email_step_current" => Some(state.email.step_current),
        "linkedin_step_current" => Some(state.linkedin.step_current),
        "email_step_total" => Some(state.email.step_total),
        "linkedin_step_total" => Some(state.linkedin.step_total),
        _ => None,
    }
}

fn flag_field(state: &OrchestrationState, field: &str) -> Option<bool> {
    match field {
        "linkedin_connected" => Some(state.signals.linkedin_connected),
        "linkedin_replied" => Some(state.signals.linkedin_replied),
        "email_opened" => Some(state.signals.email_opened),
        "email_clicked" => Some(state.signals.email_clicked),
        "email_replied" => Some(state.signals.email_replied),
        "email_paused" => Some(state.email.paused),
        "linkedin_paused" => Some(state.linkedin.paused),
        _ => None,
    }
}
