//! Send-time conditional-copy selection.
//!
//! Steps carry every variant from generation; the orchestrator picks the
//! most specific one for the lead's current cross-channel state. Nothing
//! is regenerated at send time.

use serde_json::{json, Value};

use crate::types::orchestration::CrossChannelSignals;
use crate::types::{EmailStep, LinkedInStep};

/// Pick the email body for a step: `body_linkedin_replied` once the lead
/// replied on LinkedIn, else `body_linkedin_connected` once connected,
/// else the base body.
pub fn select_email_body<'a>(step: &'a EmailStep, signals: &CrossChannelSignals) -> &'a str {
    if signals.linkedin_replied {
        if let Some(body) = step.body_linkedin_replied.as_deref() {
            return body;
        }
    }
    if signals.linkedin_connected {
        if let Some(body) = step.body_linkedin_connected.as_deref() {
            return body;
        }
    }
    &step.body
}

/// Pick the LinkedIn body, symmetric to email: replied beats opened beats
/// base. Without personalization data the `*_fallback` variant wins.
pub fn select_linkedin_body<'a>(
    step: &'a LinkedInStep,
    signals: &CrossChannelSignals,
    personalization_available: bool,
) -> Option<&'a str> {
    if signals.email_replied {
        if let Some(body) = step.body_email_replied.as_deref() {
            return Some(body);
        }
    }
    if signals.email_opened {
        if let Some(body) = step.body_email_opened.as_deref() {
            return Some(body);
        }
    }
    if !personalization_available {
        if let Some(fallback) = step.body_fallback.as_deref() {
            return Some(fallback);
        }
    }
    step.body.as_deref()
}

/// Pick the connection note, falling back when personalization variables
/// cannot be filled.
pub fn select_connection_note<'a>(
    step: &'a LinkedInStep,
    personalization_available: bool,
) -> Option<&'a str> {
    if !personalization_available {
        if let Some(fallback) = step.connection_note_fallback.as_deref() {
            return Some(fallback);
        }
    }
    step.connection_note.as_deref()
}

/// Custom-field map for the email provider covering the remaining unsent
/// steps, with variants already selected. Sent steps are untouched.
pub fn custom_fields_for_remaining(
    steps: &[EmailStep],
    signals: &CrossChannelSignals,
    current_step: u32,
) -> Value {
    let mut fields = serde_json::Map::new();
    for step in steps.iter().filter(|s| s.step_number > current_step) {
        fields.insert(
            format!("email_{}_subject", step.step_number),
            json!(step.subject),
        );
        fields.insert(
            format!("email_{}_body", step.step_number),
            json!(select_email_body(step, signals)),
        );
    }
    Value::Object(fields)
}
