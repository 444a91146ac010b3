//! Per-lead cross-channel orchestration.
//!
//! Deployment creates the one orchestration state per lead and pushes
//! steps to the delivery providers; event processing folds channel and
//! timer events through the pure [`events::process_event`] and applies
//! the resulting actions. Per-lead serialization comes from the runner's
//! serialization key; exactly-once application from the event-row
//! uniqueness key.

pub mod copy;
pub mod events;
pub mod triggers;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::attribution;
use crate::providers::ProviderRegistry;
use crate::runner::{names, Emitter, EventHandler, StageError, StepContext};
use crate::store::campaigns::CampaignCounter;
use crate::store::orchestration::NewOrchestrationEvent;
use crate::store::outreach::NewOutreachEvent;
use crate::store::Store;
use crate::types::{
    Campaign, Channel, CrossChannelTrigger, Lead, LeadStatus, OrchestrationState,
    OrchestrationStatus, Sentiment, Sequence, SequenceStatus, Tenant,
};

pub use events::{process_event, Action, EventInput, EventOutcome, WAIT_LINKEDIN_CONNECTION};

/// Actions fired by step-declared cross-channel triggers: an email step
/// may name a LinkedIn step to fire when it sends, and vice versa.
fn step_triggers(sequence: &Sequence, event: &EventInput) -> Vec<Action> {
    let Some(step_number) = event.step_number else {
        return Vec::new();
    };
    match event.event_type.as_str() {
        "email_sent" => sequence
            .email_steps
            .iter()
            .find(|s| s.step_number == step_number)
            .and_then(|s| s.trigger_linkedin)
            .map(|step| vec![Action::SendLinkedin { step }])
            .unwrap_or_default(),
        "linkedin_message_sent" => sequence
            .linkedin_steps
            .iter()
            .find(|s| s.step_number == step_number)
            .and_then(|s| s.trigger_email)
            .map(|step| vec![Action::SendEmail { step }])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Provider-side campaign id for the email arm.
fn email_provider_campaign(campaign: &Campaign) -> String {
    campaign
        .data_source_config
        .get("email_provider_campaign_id")
        .and_then(Value::as_str)
        .map_or_else(|| format!("cadence-{}", campaign.id), str::to_owned)
}

/// Provider-side campaign id for the LinkedIn arm.
fn linkedin_provider_campaign(campaign: &Campaign) -> String {
    campaign
        .data_source_config
        .get("linkedin_provider_campaign_id")
        .and_then(Value::as_str)
        .map_or_else(|| format!("cadence-li-{}", campaign.id), str::to_owned)
}

// ── Deployment ──────────────────────────────────────────────────

/// Creates orchestration state and deploys the approved sequence to the
/// delivery providers.
pub struct DeployHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
}

impl DeployHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>, emitter: Emitter) -> Self {
        Self {
            store,
            providers,
            emitter,
        }
    }

    async fn deploy_email(
        &self,
        tenant: &Tenant,
        campaign: &Campaign,
        lead: &Lead,
        sequence: &Sequence,
    ) -> Result<(), StageError> {
        let sender = self
            .providers
            .email_for_tenant(tenant)
            .map_err(StageError::from)?;
        let signals = crate::types::orchestration::CrossChannelSignals::default();
        let fields = copy::custom_fields_for_remaining(&sequence.email_steps, &signals, 0);
        sender
            .add_lead_to_campaign(
                &email_provider_campaign(campaign),
                &crate::providers::EmailLead {
                    email: lead.email.clone(),
                    first_name: lead.first_name.clone(),
                    last_name: lead.last_name.clone(),
                    company_name: lead.company_name.clone(),
                },
                &fields,
            )
            .await
            .map_err(StageError::from)?;
        Ok(())
    }

    async fn deploy_linkedin(
        &self,
        tenant: &Tenant,
        campaign: &Campaign,
        lead: &Lead,
        sequence: &Sequence,
    ) -> Result<bool, StageError> {
        let Some(linkedin_url) = lead.linkedin_url.as_deref() else {
            warn!(lead = lead.id, "no LinkedIn URL; skipping LinkedIn arm");
            return Ok(false);
        };
        let automation = self
            .providers
            .linkedin_for_tenant(tenant)
            .map_err(StageError::from)?;
        let personalization = lead.first_name.is_some();
        let mut fields = serde_json::Map::new();
        for step in &sequence.linkedin_steps {
            if let Some(note) = copy::select_connection_note(step, personalization) {
                fields.insert(format!("linkedin_{}_note", step.step_number), json!(note));
            }
            let signals = crate::types::orchestration::CrossChannelSignals::default();
            if let Some(body) = copy::select_linkedin_body(step, &signals, personalization) {
                fields.insert(format!("linkedin_{}_body", step.step_number), json!(body));
            }
        }
        automation
            .add_lead_to_campaign(
                &linkedin_provider_campaign(campaign),
                linkedin_url,
                &Value::Object(fields),
            )
            .await
            .map_err(StageError::from)?;
        Ok(true)
    }
}

#[async_trait]
impl EventHandler for DeployHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::LEAD_SEQUENCE_READY]
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let sequence_id = payload
            .get("sequence_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("deploy event without sequence_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("deploy event without tenant_id"))?;

        let sequence = self.store.get_sequence(tenant_id, sequence_id).await?;
        if sequence.status != SequenceStatus::Approved {
            return Err(StageError::fatal(format!(
                "sequence {sequence_id} is {}, not approved",
                sequence.status.as_str()
            )));
        }
        let lead = self.store.get_lead(tenant_id, sequence.lead_id).await?;
        if lead.status == LeadStatus::Disqualified {
            return Err(StageError::fatal(format!(
                "lead {} is disqualified",
                lead.id
            )));
        }
        let tenant = self.store.get_tenant(tenant_id).await?;
        let campaign = self
            .store
            .get_campaign(tenant_id, sequence.campaign_id)
            .await?;

        let email_total = u32::try_from(sequence.email_steps.len()).unwrap_or(0);
        let linkedin_total = u32::try_from(sequence.linkedin_steps.len()).unwrap_or(0);

        let (mut state, created) = self
            .store
            .create_orchestration_if_absent(
                tenant_id,
                lead.id,
                sequence_id,
                campaign.id,
                sequence.mode,
                email_total,
                linkedin_total,
            )
            .await?;
        if !created && state.status != OrchestrationStatus::Pending {
            info!(lead = lead.id, "orchestration already deployed");
            return Ok(());
        }

        if sequence.mode.has_email() {
            ctx.run("deploy-email", async {
                self.deploy_email(&tenant, &campaign, &lead, &sequence).await
            })
            .await?;
            state.email.started = true;
        }
        let mut linkedin_deployed = false;
        if sequence.mode.has_linkedin() {
            linkedin_deployed = ctx
                .run("deploy-linkedin", async {
                    self.deploy_linkedin(&tenant, &campaign, &lead, &sequence).await
                })
                .await?;
            state.linkedin.started = linkedin_deployed;
        }

        // Connection-first campaigns hold email until the request is
        // accepted or the timeout fires.
        let now = Utc::now();
        if sequence.strategy.wait_for_connection && linkedin_deployed {
            state.status = OrchestrationStatus::Waiting;
            state.waiting_for = Some(WAIT_LINKEDIN_CONNECTION.to_owned());
            state.waiting_since = Some(now);
            let timeout_hours = if sequence.strategy.connection_timeout_hours > 0 {
                sequence.strategy.connection_timeout_hours
            } else {
                campaign.connection_timeout_hours
            };
            state.waiting_timeout_at = now
                .checked_add_signed(chrono::Duration::hours(i64::from(timeout_hours)))
                .or(Some(now));
            ctx.run("arm-connection-timer", async {
                self.emitter
                    .arm_timer(
                        tenant_id,
                        lead.id,
                        state.waiting_timeout_at.unwrap_or(now),
                        &json!({
                            "lead_id": lead.id,
                            "tenant_id": tenant_id,
                            "event_type": "waiting_timeout",
                            "channel": "orchestrator",
                            "source_event_id": format!("timer-connection-{}", lead.id),
                        }),
                    )
                    .await
                    .map_err(|e| StageError::transient(e.to_string()))?;
                Ok(())
            })
            .await?;
        } else {
            state.status = OrchestrationStatus::Active;
        }

        self.store.save_orchestration(&state).await?;
        self.store
            .update_lead_status(tenant_id, lead.id, LeadStatus::Active)
            .await?;
        self.store
            .increment_campaign_counter(tenant_id, campaign.id, CampaignCounter::Contacted)
            .await?;
        self.store
            .append_orchestration_event(&NewOrchestrationEvent {
                tenant_id,
                lead_id: lead.id,
                sequence_id: Some(sequence_id),
                event_type: "orchestration_started".to_owned(),
                channel: Channel::Orchestrator,
                step_number: 0,
                data: json!({"mode": sequence.mode.as_str()}),
                decision: Some("deploy".to_owned()),
                reason: None,
                source_event_id: format!("deploy-{sequence_id}"),
            })
            .await?;

        info!(
            lead = lead.id,
            sequence = sequence_id,
            mode = sequence.mode.as_str(),
            "orchestration deployed"
        );
        Ok(())
    }
}

// ── Event processing ────────────────────────────────────────────

/// Folds channel and timer events into the per-lead state machine and
/// applies the resulting actions.
pub struct OrchestrationEventHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
}

impl OrchestrationEventHandler {
    /// Build the handler.
    pub fn new(store: Store, providers: Arc<ProviderRegistry>, emitter: Emitter) -> Self {
        Self {
            store,
            providers,
            emitter,
        }
    }

    async fn load_rules(
        &self,
        tenant_id: i64,
        channel: Channel,
        event_type: &str,
    ) -> Result<Vec<CrossChannelTrigger>, StageError> {
        let mut rules = self
            .store
            .list_triggers(tenant_id, channel, event_type)
            .await?;
        rules.extend(
            events::default_triggers()
                .into_iter()
                .filter(|r| r.source_channel == channel && r.source_event == event_type),
        );
        Ok(rules)
    }

    /// Record outreach for provider send confirmations, with send-time
    /// copy selection applied.
    async fn record_send(
        &self,
        state: &OrchestrationState,
        sequence: &Sequence,
        event: &EventInput,
    ) -> Result<(), StageError> {
        let Some(step_number) = event.step_number else {
            return Ok(());
        };
        let research = self.store.get_research(state.tenant_id, state.lead_id).await?;
        let (persona, relationship, top_trigger) = research
            .as_ref()
            .map(|r| {
                (
                    r.profile.persona_match.persona.clone(),
                    Some(r.profile.relationship.as_str().to_owned()),
                    r.profile.triggers.first().map(|t| t.name.clone()),
                )
            })
            .unwrap_or((None, None, None));

        let (channel, subject, body) = match event.event_type.as_str() {
            "email_sent" => {
                let Some(step) = sequence
                    .email_steps
                    .iter()
                    .find(|s| s.step_number == step_number)
                else {
                    return Ok(());
                };
                (
                    Channel::Email,
                    Some(step.subject.clone()),
                    copy::select_email_body(step, &state.signals).to_owned(),
                )
            }
            "linkedin_message_sent" => {
                let Some(step) = sequence
                    .linkedin_steps
                    .iter()
                    .find(|s| s.step_number == step_number)
                else {
                    return Ok(());
                };
                let body = copy::select_linkedin_body(step, &state.signals, true)
                    .or(step.connection_note.as_deref())
                    .unwrap_or_default()
                    .to_owned();
                (Channel::Linkedin, None, body)
            }
            _ => return Ok(()),
        };

        attribution::record_outreach(
            &self.store,
            &NewOutreachEvent {
                tenant_id: state.tenant_id,
                lead_id: state.lead_id,
                sequence_id: Some(sequence.id),
                channel,
                step_number,
                subject,
                body,
                persona,
                relationship,
                top_trigger,
                strategy: serde_json::to_value(&sequence.strategy).unwrap_or(Value::Null),
                prompt_version_id: sequence.prompt_version_id,
                provider_campaign_id: event
                    .data
                    .get("provider_campaign_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                provider_lead_id: event
                    .data
                    .get("provider_lead_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                thread_position: step_number,
                sent_at: Utc::now(),
            },
        )
        .await?;
        Ok(())
    }

    /// Record engagement rows for engagement-kind events.
    async fn record_engagement(
        &self,
        state: &OrchestrationState,
        event: &EventInput,
    ) -> Result<(), StageError> {
        let kind = match event.event_type.as_str() {
            "email_opened" => "open",
            "email_clicked" => "click",
            "email_replied" | "linkedin_replied" | "linkedin_inmail_replied" => {
                if event.data.get("sentiment").and_then(Value::as_str) == Some("positive") {
                    "positive_reply"
                } else {
                    "reply"
                }
            }
            "email_bounced" => "bounce",
            "email_unsubscribed" => "unsubscribe",
            _ => return Ok(()),
        };
        attribution::record_engagement(
            &self.store,
            &attribution::EngagementInput {
                tenant_id: state.tenant_id,
                lead_id: Some(state.lead_id),
                event_type: kind.to_owned(),
                sentiment: event
                    .data
                    .get("sentiment")
                    .and_then(Value::as_str)
                    .and_then(|s| Sentiment::parse(s).ok()),
                interest_level: event
                    .data
                    .get("interest_level")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                provider_campaign_id: event
                    .data
                    .get("provider_campaign_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                provider_lead_id: event
                    .data
                    .get("provider_lead_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                occurred_at: Utc::now(),
            },
        )
        .await?;
        Ok(())
    }

    /// Apply one action's side effects after the state committed.
    ///
    /// Provider calls here are idempotent on the provider side (pause
    /// twice, re-push the same fields); a crash between commit and side
    /// effect re-applies them on retry.
    #[allow(clippy::too_many_lines)]
    async fn apply_side_effects(
        &self,
        tenant: &Tenant,
        campaign: &Campaign,
        lead: &Lead,
        sequence: &Sequence,
        state: &OrchestrationState,
        action: &Action,
    ) -> Result<(), StageError> {
        match action {
            Action::Pause(Channel::Email) | Action::Pause(Channel::Orchestrator) => {
                if let Ok(sender) = self.providers.email_for_tenant(tenant) {
                    sender
                        .pause_lead(&email_provider_campaign(campaign), &lead.email)
                        .await
                        .map_err(StageError::from)?;
                }
            }
            Action::Pause(Channel::Linkedin) => {
                if let (Ok(automation), Some(url)) = (
                    self.providers.linkedin_for_tenant(tenant),
                    lead.linkedin_url.as_deref(),
                ) {
                    automation
                        .update_tags(
                            &linkedin_provider_campaign(campaign),
                            url,
                            &["paused".to_owned()],
                        )
                        .await
                        .map_err(StageError::from)?;
                }
            }
            Action::Resume(_) => {
                // Providers resume implicitly when fields are re-pushed.
            }
            Action::Stop { reason } => {
                if let Ok(sender) = self.providers.email_for_tenant(tenant) {
                    sender
                        .pause_lead(&email_provider_campaign(campaign), &lead.email)
                        .await
                        .ok();
                }
                if let (Ok(automation), Some(url)) = (
                    self.providers.linkedin_for_tenant(tenant),
                    lead.linkedin_url.as_deref(),
                ) {
                    automation
                        .update_tags(
                            &linkedin_provider_campaign(campaign),
                            url,
                            &["stopped".to_owned()],
                        )
                        .await
                        .ok();
                }
                let lead_status = match reason.as_str() {
                    "positive_reply" | "negative_reply" => LeadStatus::Replied,
                    _ => LeadStatus::Cold,
                };
                self.store
                    .update_lead_status(tenant.id, lead.id, lead_status)
                    .await?;
                if lead_status == LeadStatus::Replied {
                    self.store
                        .increment_campaign_counter(tenant.id, campaign.id, CampaignCounter::Replied)
                        .await?;
                }
            }
            Action::Complete => {
                self.store
                    .update_lead_status(tenant.id, lead.id, LeadStatus::Cold)
                    .await?;
            }
            Action::Wait { .. } => {
                if let Some(fire_at) = state.waiting_timeout_at {
                    self.emitter
                        .arm_timer(
                            tenant.id,
                            lead.id,
                            fire_at,
                            &json!({
                                "lead_id": lead.id,
                                "tenant_id": tenant.id,
                                "event_type": "waiting_timeout",
                                "channel": "orchestrator",
                                "source_event_id":
                                    format!("timer-{}-{}", lead.id, fire_at.timestamp()),
                            }),
                        )
                        .await
                        .map_err(|e| StageError::transient(e.to_string()))?;
                }
            }
            Action::SendEmail { step } => {
                let Some(email_step) = sequence.email_steps.iter().find(|s| s.step_number == *step)
                else {
                    warn!(step, "send_email action for unknown step");
                    return Ok(());
                };
                if let Ok(sender) = self.providers.email_for_tenant(tenant) {
                    let fields = json!({
                        format!("email_{}_subject", step): email_step.subject,
                        format!("email_{}_body", step):
                            copy::select_email_body(email_step, &state.signals),
                        "send_now_step": step,
                    });
                    sender
                        .update_lead_custom_fields(
                            &email_provider_campaign(campaign),
                            &lead.email,
                            &fields,
                        )
                        .await
                        .map_err(StageError::from)?;
                }
            }
            Action::SendLinkedin { step } => {
                let Some(li_step) = sequence
                    .linkedin_steps
                    .iter()
                    .find(|s| s.step_number == *step)
                else {
                    warn!(step, "send_linkedin action for unknown step");
                    return Ok(());
                };
                if li_step.requires_connection && !state.signals.linkedin_connected {
                    debug!(step, "linkedin step held; connection not accepted");
                    return Ok(());
                }
                if let (Ok(automation), Some(url)) = (
                    self.providers.linkedin_for_tenant(tenant),
                    lead.linkedin_url.as_deref(),
                ) {
                    if let Some(body) =
                        copy::select_linkedin_body(li_step, &state.signals, lead.first_name.is_some())
                    {
                        automation
                            .send_message(&linkedin_provider_campaign(campaign), url, body)
                            .await
                            .map_err(StageError::from)?;
                    }
                }
            }
            Action::SyncConditionalCopy => {
                // Push selected variants for every remaining unsent email
                // step; already-sent steps are never modified.
                if let Ok(sender) = self.providers.email_for_tenant(tenant) {
                    let fields = copy::custom_fields_for_remaining(
                        &sequence.email_steps,
                        &state.signals,
                        state.email.step_current,
                    );
                    sender
                        .update_lead_custom_fields(
                            &email_provider_campaign(campaign),
                            &lead.email,
                            &fields,
                        )
                        .await
                        .map_err(StageError::from)?;
                }
            }
            Action::MarkConverted => {
                self.store
                    .update_lead_status(tenant.id, lead.id, LeadStatus::Converted)
                    .await?;
                self.store
                    .increment_campaign_counter(tenant.id, campaign.id, CampaignCounter::Converted)
                    .await?;
            }
            Action::Alert { message } => {
                self.providers
                    .notifier()
                    .send(
                        tenant.notify_channel.as_deref().unwrap_or("ops"),
                        &json!({
                            "kind": "orchestration_alert",
                            "lead_id": lead.id,
                            "message": message,
                        }),
                    )
                    .await
                    .ok();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for OrchestrationEventHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::ORCHESTRATION_EVENT]
    }

    async fn handle(&self, _ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let lead_id = payload
            .get("lead_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("orchestration event without lead_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("orchestration event without tenant_id"))?;
        let event: EventInput = serde_json::from_value(payload.clone())
            .map_err(|e| StageError::fatal(format!("malformed orchestration event: {e}")))?;

        let Some(state) = self.store.get_orchestration_by_lead(tenant_id, lead_id).await? else {
            // Engagement without orchestration is stored unattributed,
            // never dropped.
            warn!(lead = lead_id, event = %event.event_type, "event for undeployed lead");
            self.record_engagement(
                &OrchestrationState {
                    id: 0,
                    tenant_id,
                    lead_id,
                    sequence_id: 0,
                    campaign_id: 0,
                    mode: crate::types::CampaignMode::EmailOnly,
                    email: Default::default(),
                    linkedin: Default::default(),
                    signals: Default::default(),
                    status: OrchestrationStatus::Pending,
                    waiting_for: None,
                    waiting_since: None,
                    waiting_timeout_at: None,
                    stop_reason: None,
                    version: 0,
                },
                &event,
            )
            .await?;
            return Ok(());
        };

        let rules = self
            .load_rules(tenant_id, event.channel, &event.event_type)
            .await?;
        let outcome = events::process_event(&state, &rules, &event, Utc::now());

        let mut log_iter = outcome.log.iter();
        let incoming = log_iter
            .next()
            .map(|entry| NewOrchestrationEvent {
                tenant_id,
                lead_id,
                sequence_id: Some(state.sequence_id),
                event_type: entry.event_type.clone(),
                channel: entry.channel,
                step_number: entry.step_number,
                data: entry.data.clone(),
                decision: entry.decision.clone(),
                reason: entry.reason.clone(),
                source_event_id: event.source_event_id.clone(),
            })
            .ok_or_else(|| StageError::fatal("event fold produced no log"))?;
        let decisions: Vec<NewOrchestrationEvent> = log_iter
            .map(|entry| NewOrchestrationEvent {
                tenant_id,
                lead_id,
                sequence_id: Some(state.sequence_id),
                event_type: entry.event_type.clone(),
                channel: entry.channel,
                step_number: entry.step_number,
                data: entry.data.clone(),
                decision: entry.decision.clone(),
                reason: entry.reason.clone(),
                source_event_id: event.source_event_id.clone(),
            })
            .collect();

        let fresh = self
            .store
            .apply_orchestration_outcome(&outcome.state, &incoming, &decisions)
            .await?;
        if !fresh {
            debug!(lead = lead_id, event = %event.event_type, "duplicate event dropped");
            return Ok(());
        }

        // Attribution first, then provider side effects.
        let tenant = self.store.get_tenant(tenant_id).await?;
        let campaign = self.store.get_campaign(tenant_id, state.campaign_id).await?;
        let lead = self.store.get_lead(tenant_id, lead_id).await?;
        let sequence = self.store.get_sequence(tenant_id, state.sequence_id).await?;

        self.record_send(&outcome.state, &sequence, &event).await?;
        self.record_engagement(&outcome.state, &event).await?;

        for action in &outcome.actions {
            self.apply_side_effects(&tenant, &campaign, &lead, &sequence, &outcome.state, action)
                .await?;
        }

        // Step-declared cross-channel triggers: a send on one channel may
        // fire a specific step on the other.
        for action in step_triggers(&sequence, &event) {
            self.apply_side_effects(&tenant, &campaign, &lead, &sequence, &outcome.state, &action)
                .await?;
        }

        info!(
            lead = lead_id,
            event = %event.event_type,
            status = outcome.state.status.as_str(),
            actions = outcome.actions.len(),
            "orchestration event applied"
        );
        Ok(())
    }
}
