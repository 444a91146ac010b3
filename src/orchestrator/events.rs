//! Pure per-lead event processing.
//!
//! `process_event` is a fold: (state, event) → (new state, actions, log).
//! No I/O happens here; the handler applies the returned actions and
//! appends the log rows in the same logical unit of work. Replays are
//! harmless because the caller dedupes on the orchestration-event
//! uniqueness key before applying side effects.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    Channel, CrossChannelTrigger, OrchestrationState, OrchestrationStatus, Sentiment,
    TriggerAction,
};

use super::triggers;

/// Wait reason used for connection holds.
pub const WAIT_LINKEDIN_CONNECTION: &str = "linkedin_connection";

/// One event delivered to a lead's orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    /// Event type ("email_opened", "linkedin_connected",
    /// "waiting_timeout", ...).
    pub event_type: String,
    /// Channel the event arrived on.
    pub channel: Channel,
    /// Step number when applicable.
    #[serde(default)]
    pub step_number: Option<u32>,
    /// Opaque event data (sentiment, interest level, provider ids).
    #[serde(default)]
    pub data: Value,
    /// External id for exactly-once application.
    pub source_event_id: String,
}

impl EventInput {
    fn sentiment(&self) -> Option<Sentiment> {
        self.data
            .get("sentiment")
            .and_then(Value::as_str)
            .and_then(|s| Sentiment::parse(s).ok())
    }

    fn interest_level(&self) -> Option<&str> {
        self.data.get("interest_level").and_then(Value::as_str)
    }
}

/// An action the handler must apply after the fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Pause one channel arm (state + provider).
    Pause(Channel),
    /// Resume one channel arm.
    Resume(Channel),
    /// Stop the orchestration; terminal.
    Stop {
        /// Recorded stop reason.
        reason: String,
    },
    /// Both channels exhausted cleanly; terminal.
    Complete,
    /// Enter a wait with a timer.
    Wait {
        /// What the wait is for.
        reason: String,
        /// Upper bound in hours.
        timeout_hours: u32,
    },
    /// Send a specific email step now.
    SendEmail {
        /// 1-based step number.
        step: u32,
    },
    /// Send a specific LinkedIn step now.
    SendLinkedin {
        /// 1-based step number.
        step: u32,
    },
    /// Push conditional-copy variants to the email provider.
    SyncConditionalCopy,
    /// Mark the lead converted; terminal.
    MarkConverted,
    /// Operator alert.
    Alert {
        /// Alert message.
        message: String,
    },
}

/// One orchestration-event row to append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Event type recorded.
    pub event_type: String,
    /// Channel recorded.
    pub channel: Channel,
    /// Step number recorded.
    pub step_number: u32,
    /// Row data.
    pub data: Value,
    /// Decision taken.
    pub decision: Option<String>,
    /// Reason string.
    pub reason: Option<String>,
}

/// The fold result.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// Post-event state (version untouched; the save bumps it).
    pub state: OrchestrationState,
    /// Side effects to apply, in order.
    pub actions: Vec<Action>,
    /// Orchestration-event rows to append, in order.
    pub log: Vec<LogEntry>,
}

/// Process one event against the current state.
pub fn process_event(
    state: &OrchestrationState,
    rules: &[CrossChannelTrigger],
    event: &EventInput,
    now: DateTime<Utc>,
) -> EventOutcome {
    let mut log = vec![LogEntry {
        event_type: event.event_type.clone(),
        channel: event.channel,
        step_number: event.step_number.unwrap_or(0),
        data: event.data.clone(),
        decision: None,
        reason: None,
    }];

    if state.status.is_terminal() {
        log[0].decision = Some("ignored".to_owned());
        log[0].reason = Some(format!("orchestration is {}", state.status.as_str()));
        return EventOutcome {
            state: state.clone(),
            actions: Vec::new(),
            log,
        };
    }

    let mut next = state.clone();
    derive_signals(&mut next, event, now);

    // Cross-channel rules run on the merged post-event state; internal
    // orchestrator events are exempt.
    let mut actions: Vec<Action> = Vec::new();
    let mut triggered = false;
    if event.channel != Channel::Orchestrator {
        if let Some(rule) = triggers::first_match(rules, &next, event.channel, &event.event_type) {
            triggered = true;
            let action = action_from_trigger(&rule.target_action);
            log.push(LogEntry {
                event_type: "cross_channel_trigger".to_owned(),
                channel: event.channel,
                step_number: event.step_number.unwrap_or(0),
                data: serde_json::to_value(&rule.target_action).unwrap_or(Value::Null),
                decision: Some(action_name(&action).to_owned()),
                reason: Some(format!("trigger {} matched", rule.id)),
            });
            actions.push(action);
        }
    }

    if !triggered {
        actions.extend(default_actions(&next, event));
        for action in &actions {
            // One row per action; the type carries the action name so
            // rows stay distinct under the exactly-once key.
            log.push(LogEntry {
                event_type: format!("decision_{}", action_name(action)),
                channel: Channel::Orchestrator,
                step_number: event.step_number.unwrap_or(0),
                data: Value::Null,
                decision: Some(action_name(action).to_owned()),
                reason: Some("default action".to_owned()),
            });
        }
    }

    for action in &actions {
        apply_action(&mut next, action, now);
    }

    EventOutcome {
        state: next,
        actions,
        log,
    }
}

/// Apply the event-type table of state derivations. Pure.
fn derive_signals(state: &mut OrchestrationState, event: &EventInput, now: DateTime<Utc>) {
    match event.event_type.as_str() {
        "email_sent" => {
            let step = event.step_number.unwrap_or(0);
            let arm = state.arm_mut(Channel::Email);
            arm.started = true;
            arm.step_current = arm.step_current.max(step);
            arm.last_sent_at = Some(now);
            if arm.exhausted() {
                arm.completed = true;
            }
        }
        "email_opened" => {
            state.signals.email_opened = true;
            state.signals.email_opened_count = state.signals.email_opened_count.saturating_add(1);
        }
        "email_clicked" => {
            state.signals.email_clicked = true;
        }
        "email_replied" => {
            state.signals.email_replied = true;
            state.signals.email_reply_sentiment = event.sentiment();
        }
        "linkedin_connection_sent" => {
            state.arm_mut(Channel::Linkedin).started = true;
        }
        "linkedin_connected" => {
            state.signals.linkedin_connected = true;
            state.signals.linkedin_connected_at = Some(now);
            if state.waiting_for.as_deref() == Some(WAIT_LINKEDIN_CONNECTION) {
                clear_wait(state);
            }
        }
        "linkedin_message_sent" => {
            let step = event.step_number.unwrap_or(0);
            let arm = state.arm_mut(Channel::Linkedin);
            arm.step_current = arm.step_current.max(step);
            arm.last_sent_at = Some(now);
            if arm.exhausted() {
                arm.completed = true;
            }
        }
        "linkedin_replied" | "linkedin_inmail_replied" => {
            state.signals.linkedin_replied = true;
            state.signals.linkedin_reply_sentiment = event.sentiment();
        }
        "linkedin_campaign_completed" => {
            state.arm_mut(Channel::Linkedin).completed = true;
        }
        "waiting_timeout" => {
            if state.status == OrchestrationStatus::Waiting {
                clear_wait(state);
            }
        }
        // Soft touches (post_liked, profile_viewed, follow_sent,
        // tag_updated) are logged without state derivation.
        _ => {}
    }
}

fn clear_wait(state: &mut OrchestrationState) {
    state.waiting_for = None;
    state.waiting_since = None;
    state.waiting_timeout_at = None;
    if state.status == OrchestrationStatus::Waiting {
        state.status = OrchestrationStatus::Active;
    }
}

/// Default actions when no trigger fired.
fn default_actions(state: &OrchestrationState, event: &EventInput) -> Vec<Action> {
    let mut actions = Vec::new();

    match event.event_type.as_str() {
        "email_replied" => {
            let sentiment = state.signals.email_reply_sentiment;
            if sentiment.is_none_or(|s| s.is_non_negative()) {
                actions.push(Action::Stop {
                    reason: "positive_reply".to_owned(),
                });
                if sentiment == Some(Sentiment::Positive)
                    && event.interest_level() == Some("hot")
                {
                    actions.push(Action::MarkConverted);
                }
                return actions;
            }
            actions.push(Action::Stop {
                reason: "negative_reply".to_owned(),
            });
            return actions;
        }
        "email_bounced" => {
            actions.push(Action::Pause(Channel::Email));
            return actions;
        }
        "email_unsubscribed" => {
            actions.push(Action::Stop {
                reason: "unsubscribed".to_owned(),
            });
            return actions;
        }
        _ => {}
    }

    // Sequence exhaustion: the mode's termination rule is both deployed
    // arms out of steps.
    if state.all_channels_exhausted() {
        actions.push(Action::Complete);
    }
    actions
}

fn action_from_trigger(action: &TriggerAction) -> Action {
    match action {
        TriggerAction::Pause { channel } => Action::Pause(*channel),
        TriggerAction::Resume { channel } => Action::Resume(*channel),
        TriggerAction::Stop { reason } => Action::Stop {
            reason: reason.clone(),
        },
        TriggerAction::Wait {
            reason,
            timeout_hours,
        } => Action::Wait {
            reason: reason.clone(),
            timeout_hours: *timeout_hours,
        },
        TriggerAction::SendEmail { step } => Action::SendEmail { step: *step },
        TriggerAction::SendLinkedin { step } => Action::SendLinkedin { step: *step },
        TriggerAction::ConditionalCopySync => Action::SyncConditionalCopy,
        TriggerAction::MarkConverted => Action::MarkConverted,
        TriggerAction::Alert { message } => Action::Alert {
            message: message.clone(),
        },
    }
}

/// Stable action names for the audit log.
pub fn action_name(action: &Action) -> &'static str {
    match action {
        Action::Pause(_) => "pause",
        Action::Resume(_) => "resume",
        Action::Stop { .. } => "stop",
        Action::Complete => "complete",
        Action::Wait { .. } => "wait",
        Action::SendEmail { .. } => "send_email",
        Action::SendLinkedin { .. } => "send_linkedin",
        Action::SyncConditionalCopy => "conditional_copy_sync",
        Action::MarkConverted => "mark_converted",
        Action::Alert { .. } => "alert",
    }
}

/// Fold one action into the state. Pure.
fn apply_action(state: &mut OrchestrationState, action: &Action, now: DateTime<Utc>) {
    match action {
        Action::Pause(channel) => {
            state.arm_mut(*channel).paused = true;
            let email_idle = !state.mode.has_email() || state.email.paused;
            let linkedin_idle = !state.mode.has_linkedin() || state.linkedin.paused;
            if email_idle && linkedin_idle {
                state.status = OrchestrationStatus::Paused;
            }
        }
        Action::Resume(channel) => {
            state.arm_mut(*channel).paused = false;
            if matches!(
                state.status,
                OrchestrationStatus::Paused | OrchestrationStatus::Waiting
            ) {
                clear_wait(state);
                state.status = OrchestrationStatus::Active;
            }
        }
        Action::Stop { reason } => {
            state.status = OrchestrationStatus::Stopped;
            state.stop_reason = Some(reason.clone());
            state.email.paused = true;
            state.linkedin.paused = true;
            state.waiting_for = None;
            state.waiting_since = None;
            state.waiting_timeout_at = None;
        }
        Action::Complete => {
            state.status = OrchestrationStatus::Completed;
            state.email.completed = state.email.completed || state.mode.has_email();
            state.linkedin.completed = state.linkedin.completed || state.mode.has_linkedin();
        }
        Action::Wait {
            reason,
            timeout_hours,
        } => {
            state.status = OrchestrationStatus::Waiting;
            state.waiting_for = Some(reason.clone());
            state.waiting_since = Some(now);
            state.waiting_timeout_at = now
                .checked_add_signed(Duration::hours(i64::from(*timeout_hours)))
                .or(Some(now));
        }
        Action::SendEmail { .. } | Action::SendLinkedin { .. } => {
            // Counters advance on the provider's sent webhook, not here.
        }
        Action::SyncConditionalCopy | Action::Alert { .. } => {}
        Action::MarkConverted => {
            state.status = OrchestrationStatus::Converted;
        }
    }
}

/// Built-in cross-channel trigger rules, appended after tenant rules.
pub fn default_triggers() -> Vec<CrossChannelTrigger> {
    vec![
        // An accepted connection swaps remaining email copy to the
        // connected variants.
        CrossChannelTrigger {
            id: 0,
            tenant_id: None,
            source_channel: Channel::Linkedin,
            source_event: "linkedin_connected".to_owned(),
            conditions: Vec::new(),
            target_action: TriggerAction::ConditionalCopySync,
            priority: 1000,
        },
        // A LinkedIn reply also swaps copy; stop handling is left to
        // tenant rules or the reply classifier.
        CrossChannelTrigger {
            id: 0,
            tenant_id: None,
            source_channel: Channel::Linkedin,
            source_event: "linkedin_replied".to_owned(),
            conditions: Vec::new(),
            target_action: TriggerAction::ConditionalCopySync,
            priority: 1001,
        },
    ]
}
