//! Shared fixtures: mock providers and seed rows.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::Row;
use uuid::Uuid;

use cadence::providers::{
    ChatRequest, ChatResponse, EmailLead, EmailSender, FinishReason, LinkedInAutomation,
    LlmClient, ProviderError, ProviderRegistry, ReceivedReply, TokenUsage,
};
use cadence::runner::{Emitter, StepContext};
use cadence::store::Store;

/// Scripted LLM: pops one canned response per call.
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    pub calls: AtomicU32,
}

impl MockLlm {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(str::to_owned).collect()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| ProviderError::Unavailable("no scripted response".to_owned()))?;
        Ok(ChatResponse {
            content: next,
            usage: TokenUsage::default(),
            finish: FinishReason::EndTurn,
        })
    }

    async fn validate(&self) -> bool {
        true
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// Email sender that records every call.
#[derive(Default)]
pub struct RecordingEmail {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingEmail {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls_named(&self, name: &str) -> Vec<Value> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|(kind, _)| kind == name)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn add_lead_to_campaign(
        &self,
        campaign_id: &str,
        lead: &EmailLead,
        custom_fields: &Value,
    ) -> Result<(), ProviderError> {
        self.calls.lock().expect("lock").push((
            "add".to_owned(),
            json!({"campaign": campaign_id, "email": lead.email, "fields": custom_fields}),
        ));
        Ok(())
    }

    async fn update_lead_custom_fields(
        &self,
        campaign_id: &str,
        email: &str,
        custom_fields: &Value,
    ) -> Result<(), ProviderError> {
        self.calls.lock().expect("lock").push((
            "update".to_owned(),
            json!({"campaign": campaign_id, "email": email, "fields": custom_fields}),
        ));
        Ok(())
    }

    async fn pause_lead(&self, campaign_id: &str, email: &str) -> Result<(), ProviderError> {
        self.calls.lock().expect("lock").push((
            "pause".to_owned(),
            json!({"campaign": campaign_id, "email": email}),
        ));
        Ok(())
    }

    async fn fetch_received_replies(
        &self,
        _since: DateTime<Utc>,
        _campaign_id: Option<&str>,
    ) -> Result<Vec<ReceivedReply>, ProviderError> {
        Ok(Vec::new())
    }
}

/// LinkedIn automation that records every call.
#[derive(Default)]
pub struct RecordingLinkedin {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingLinkedin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl LinkedInAutomation for RecordingLinkedin {
    async fn add_lead_to_campaign(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        custom_fields: &Value,
    ) -> Result<(), ProviderError> {
        self.calls.lock().expect("lock").push((
            "add".to_owned(),
            json!({"campaign": campaign_id, "url": linkedin_url, "fields": custom_fields}),
        ));
        Ok(())
    }

    async fn send_message(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        body: &str,
    ) -> Result<(), ProviderError> {
        self.calls.lock().expect("lock").push((
            "message".to_owned(),
            json!({"campaign": campaign_id, "url": linkedin_url, "body": body}),
        ));
        Ok(())
    }

    async fn update_tags(
        &self,
        campaign_id: &str,
        linkedin_url: &str,
        tags: &[String],
    ) -> Result<(), ProviderError> {
        self.calls.lock().expect("lock").push((
            "tags".to_owned(),
            json!({"campaign": campaign_id, "url": linkedin_url, "tags": tags}),
        ));
        Ok(())
    }
}

/// Registry wired to the mocks under the names the seeded tenant uses.
pub fn registry(
    llm: Arc<MockLlm>,
    email: Arc<RecordingEmail>,
    linkedin: Arc<RecordingLinkedin>,
) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::empty();
    registry.register_llm("mock", llm);
    registry.register_email("mock-email", email);
    registry.register_linkedin("mock-li", linkedin);
    Arc::new(registry)
}

/// A step context with a fresh event id (one per delivery).
pub fn ctx(store: &Store) -> StepContext {
    StepContext::new(store.pool().clone(), Uuid::new_v4().to_string(), 1)
}

/// Emitter over the store's queue.
pub fn emitter(store: &Store) -> Emitter {
    Emitter::new(store.pool().clone())
}

/// Queued runner events as (name, payload) pairs.
pub async fn queued_events(store: &Store) -> Vec<(String, Value)> {
    let rows = sqlx::query("SELECT name, payload FROM runner_events ORDER BY rowid")
        .fetch_all(store.pool())
        .await
        .expect("runner_events");
    rows.iter()
        .map(|row| {
            let name: String = row.try_get("name").expect("name");
            let payload: String = row.try_get("payload").expect("payload");
            (name, serde_json::from_str(&payload).expect("payload json"))
        })
        .collect()
}

/// Seed a tenant with an ICP, mock provider names, and both channels.
pub async fn seed_tenant(store: &Store) -> i64 {
    let icp = json!({
        "account_criteria": [
            {"field": "industry", "values": ["saas", "retail"], "priority": "high"},
            {"field": "employee_count", "values": ["51-200"], "priority": "high"}
        ],
        "personas": [
            {"name": "Marketing leader", "titles": ["VP Marketing", "CMO"], "seniority": ["vp"]}
        ],
        "triggers": [
            {"name": "recent funding", "source": "web_search",
             "what_to_look_for": ["raised", "series"], "impact": 0.8}
        ],
        "disqualifiers": ["students"]
    });
    sqlx::query(
        "INSERT INTO tenants (name, active_email_provider, active_linkedin_provider, \
         enabled_channels, enabled_data_sources, icp, llm_provider, llm_model) \
         VALUES ('t1', 'mock-email', 'mock-li', '[\"email\",\"linkedin\"]', \
         '[\"pixel\",\"intent\"]', ?1, 'mock', 'mock-model')",
    )
    .bind(icp.to_string())
    .execute(store.pool())
    .await
    .expect("tenant")
    .last_insert_rowid()
}

/// Seed a brand under the tenant.
pub async fn seed_brand(store: &Store, tenant: i64) -> i64 {
    sqlx::query(
        "INSERT INTO brands (tenant_id, name, voice, value_proposition) \
         VALUES (?1, 'Apex', 'direct', 'Cut manual outreach work')",
    )
    .bind(tenant)
    .execute(store.pool())
    .await
    .expect("brand")
    .last_insert_rowid()
}

/// Seed an active campaign.
pub async fn seed_campaign(
    store: &Store,
    tenant: i64,
    brand: i64,
    mode: &str,
    source: &str,
    config: &Value,
) -> i64 {
    sqlx::query(
        "INSERT INTO campaigns (tenant_id, brand_id, name, status, mode, data_source_kind, \
         data_source_config, email_step_count, linkedin_step_count) \
         VALUES (?1, ?2, 'Q3', 'active', ?3, ?4, ?5, 3, 2)",
    )
    .bind(tenant)
    .bind(brand)
    .bind(mode)
    .bind(source)
    .bind(config.to_string())
    .execute(store.pool())
    .await
    .expect("campaign")
    .last_insert_rowid()
}

/// Seed a lead directly (bypassing qualification).
pub async fn seed_lead(store: &Store, tenant: i64, campaign: i64, email: &str) -> i64 {
    sqlx::query(
        "INSERT INTO leads (tenant_id, campaign_id, email, first_name, last_name, job_title, \
         linkedin_url, company_name, source, visit_count, first_seen_at, last_seen_at, status) \
         VALUES (?1, ?2, ?3, 'Alice', 'Zhou', 'VP Marketing', \
         'https://linkedin.com/in/alice', 'Acme', 'pixel', 1, datetime('now'), \
         datetime('now'), 'active')",
    )
    .bind(tenant)
    .bind(campaign)
    .bind(email)
    .execute(store.pool())
    .await
    .expect("lead")
    .last_insert_rowid()
}

/// Seed an approved multi-channel sequence with conditional-copy
/// variants on every step.
pub async fn seed_sequence(store: &Store, tenant: i64, lead: i64, campaign: i64) -> i64 {
    let email_steps = json!([
        {"step_number": 1, "day": 1, "step_type": "initial",
         "subject": "s1", "body": "base 1",
         "body_linkedin_connected": "connected 1", "body_linkedin_replied": "replied 1",
         "word_count": 2},
        {"step_number": 2, "day": 3, "step_type": "value_add",
         "subject": "s2", "body": "base 2",
         "body_linkedin_connected": "connected 2", "body_linkedin_replied": "replied 2",
         "word_count": 2},
        {"step_number": 3, "day": 5, "step_type": "bump",
         "subject": "s3", "body": "base 3",
         "body_linkedin_connected": "connected 3", "body_linkedin_replied": "replied 3",
         "word_count": 2}
    ]);
    let linkedin_steps = json!([
        {"step_number": 1, "day": 1, "step_type": "connection_request",
         "connection_note": "Hi Alice", "connection_note_fallback": "Hi there",
         "requires_connection": false},
        {"step_number": 2, "day": 3, "step_type": "message",
         "body": "li base 2", "body_fallback": "li fallback 2",
         "body_email_opened": "li opened 2", "body_email_replied": "li replied 2",
         "requires_connection": true}
    ]);
    let strategy = json!({
        "primary_angle": "funding", "cross_channel_triggers": [], "tone": "warm",
        "linkedin_first": false, "wait_for_connection": false, "connection_timeout_hours": 72
    });
    sqlx::query(
        "INSERT INTO sequences (tenant_id, lead_id, campaign_id, mode, email_steps, \
         linkedin_steps, strategy, status) \
         VALUES (?1, ?2, ?3, 'multi_channel', ?4, ?5, ?6, 'approved')",
    )
    .bind(tenant)
    .bind(lead)
    .bind(campaign)
    .bind(email_steps.to_string())
    .bind(linkedin_steps.to_string())
    .bind(strategy.to_string())
    .execute(store.pool())
    .await
    .expect("sequence")
    .last_insert_rowid()
}

/// Seed an active orchestration state mid-sequence.
pub async fn seed_orchestration(
    store: &Store,
    tenant: i64,
    lead: i64,
    sequence: i64,
    campaign: i64,
) -> i64 {
    sqlx::query(
        "INSERT INTO orchestration_states (tenant_id, lead_id, sequence_id, campaign_id, mode, \
         email_step_current, email_step_total, email_started, \
         linkedin_step_current, linkedin_step_total, linkedin_started, status) \
         VALUES (?1, ?2, ?3, ?4, 'multi_channel', 1, 3, 1, 1, 2, 1, 'active')",
    )
    .bind(tenant)
    .bind(lead)
    .bind(sequence)
    .bind(campaign)
    .execute(store.pool())
    .await
    .expect("orchestration")
    .last_insert_rowid()
}
