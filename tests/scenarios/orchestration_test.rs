//! Cross-channel orchestration scenarios.

use serde_json::json;
use sqlx::Row;

use cadence::orchestrator::{DeployHandler, OrchestrationEventHandler};
use cadence::runner::EventHandler;
use cadence::store::Store;
use cadence::types::{LeadStatus, OrchestrationStatus};

use super::support::{
    ctx, emitter, queued_events, registry, seed_brand, seed_campaign, seed_lead,
    seed_orchestration, seed_sequence, seed_tenant, MockLlm, RecordingEmail, RecordingLinkedin,
};

struct Fixture {
    store: Store,
    tenant: i64,
    lead: i64,
    email: std::sync::Arc<RecordingEmail>,
    handler: OrchestrationEventHandler,
}

async fn fixture() -> Fixture {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign =
        seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;
    let lead = seed_lead(&store, tenant, campaign, "alice@acme.io").await;
    let sequence = seed_sequence(&store, tenant, lead, campaign).await;
    seed_orchestration(&store, tenant, lead, sequence, campaign).await;

    let email = RecordingEmail::new();
    let handler = OrchestrationEventHandler::new(
        store.clone(),
        registry(MockLlm::new(vec![]), email.clone(), RecordingLinkedin::new()),
        emitter(&store),
    );
    Fixture {
        store,
        tenant,
        lead,
        email,
        handler,
    }
}

fn event(fixture: &Fixture, event_type: &str, channel: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "tenant_id": fixture.tenant,
        "lead_id": fixture.lead,
        "event_type": event_type,
        "channel": channel,
        "data": data,
        "source_event_id": format!("src-{event_type}"),
    })
}

/// Scenario: the lead accepts the connection mid-email-sequence. The
/// connected copy is pushed for remaining steps; nothing sends
/// immediately.
#[tokio::test]
async fn connection_swaps_remaining_email_copy() {
    let fixture = fixture().await;
    fixture
        .handler
        .handle(
            &ctx(&fixture.store),
            event(&fixture, "linkedin_connected", "linkedin", json!({})),
        )
        .await
        .expect("handle");

    let state = fixture
        .store
        .get_orchestration_by_lead(fixture.tenant, fixture.lead)
        .await
        .expect("read")
        .expect("state");
    assert!(state.signals.linkedin_connected);
    assert!(state.signals.linkedin_connected_at.is_some());
    assert_eq!(state.status, OrchestrationStatus::Active);

    // Conditional-copy sync covers steps 2 and 3 (step 1 already sent).
    let updates = fixture.email.calls_named("update");
    assert_eq!(updates.len(), 1);
    let fields = &updates[0]["fields"];
    assert!(fields.get("email_1_body").is_none());
    assert_eq!(fields["email_2_body"], "connected 2");
    assert_eq!(fields["email_3_body"], "connected 3");
    assert!(fixture.email.calls_named("add").is_empty(), "no send fires");

    let events = fixture
        .store
        .list_orchestration_events(fixture.tenant, fixture.lead)
        .await
        .expect("events");
    assert_eq!(events[0].event_type, "linkedin_connected");
    assert_eq!(events[1].event_type, "cross_channel_trigger");
    assert_eq!(events[1].decision.as_deref(), Some("conditional_copy_sync"));
}

/// Scenario: positive reply stops the orchestration and pauses delivery.
#[tokio::test]
async fn positive_reply_stops_and_pauses() {
    let fixture = fixture().await;
    fixture
        .handler
        .handle(
            &ctx(&fixture.store),
            event(
                &fixture,
                "email_replied",
                "email",
                json!({"sentiment": "positive", "interest_level": "warm"}),
            ),
        )
        .await
        .expect("handle");

    let state = fixture
        .store
        .get_orchestration_by_lead(fixture.tenant, fixture.lead)
        .await
        .expect("read")
        .expect("state");
    assert_eq!(state.status, OrchestrationStatus::Stopped);
    assert_eq!(state.stop_reason.as_deref(), Some("positive_reply"));
    assert!(state.email.paused);
    assert!(state.linkedin.paused);

    assert_eq!(fixture.email.calls_named("pause").len(), 1);

    let lead = fixture
        .store
        .get_lead(fixture.tenant, fixture.lead)
        .await
        .expect("lead");
    assert_eq!(lead.status, LeadStatus::Replied);
}

/// Scenario: hot positive reply also converts.
#[tokio::test]
async fn hot_reply_marks_converted() {
    let fixture = fixture().await;
    fixture
        .handler
        .handle(
            &ctx(&fixture.store),
            event(
                &fixture,
                "email_replied",
                "email",
                json!({"sentiment": "positive", "interest_level": "hot"}),
            ),
        )
        .await
        .expect("handle");

    let state = fixture
        .store
        .get_orchestration_by_lead(fixture.tenant, fixture.lead)
        .await
        .expect("read")
        .expect("state");
    assert_eq!(state.status, OrchestrationStatus::Converted);

    let lead = fixture
        .store
        .get_lead(fixture.tenant, fixture.lead)
        .await
        .expect("lead");
    assert_eq!(lead.status, LeadStatus::Converted);
}

/// Duplicate deliveries of the same source event apply once.
#[tokio::test]
async fn redelivered_events_apply_once() {
    let fixture = fixture().await;
    let payload = event(&fixture, "email_opened", "email", json!({}));
    fixture
        .handler
        .handle(&ctx(&fixture.store), payload.clone())
        .await
        .expect("first");
    fixture
        .handler
        .handle(&ctx(&fixture.store), payload)
        .await
        .expect("redelivery");

    let state = fixture
        .store
        .get_orchestration_by_lead(fixture.tenant, fixture.lead)
        .await
        .expect("read")
        .expect("state");
    assert_eq!(state.signals.email_opened_count, 1, "duplicate dropped");
}

/// Sent webhooks record the outreach verbatim with element tags.
#[tokio::test]
async fn email_sent_records_outreach() {
    let fixture = fixture().await;
    let mut payload = event(&fixture, "email_sent", "email", json!({}));
    payload["step_number"] = json!(2);
    fixture
        .handler
        .handle(&ctx(&fixture.store), payload)
        .await
        .expect("handle");

    let row = sqlx::query("SELECT subject, body FROM outreach_events WHERE lead_id = ?1")
        .bind(fixture.lead)
        .fetch_one(fixture.store.pool())
        .await
        .expect("outreach row");
    assert_eq!(row.try_get::<String, _>("subject").expect("subject"), "s2");
    assert_eq!(row.try_get::<String, _>("body").expect("body"), "base 2");
}

/// Events for a lead with no orchestration state become unattributed
/// engagements rather than being dropped.
#[tokio::test]
async fn undeployed_lead_events_store_unattributed() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;
    let lead = seed_lead(&store, tenant, campaign, "alice@acme.io").await;

    let handler = OrchestrationEventHandler::new(
        store.clone(),
        registry(
            MockLlm::new(vec![]),
            RecordingEmail::new(),
            RecordingLinkedin::new(),
        ),
        emitter(&store),
    );
    handler
        .handle(
            &ctx(&store),
            json!({
                "tenant_id": tenant,
                "lead_id": lead,
                "event_type": "email_opened",
                "channel": "email",
                "data": {},
                "source_event_id": "stray-1",
            }),
        )
        .await
        .expect("handled gracefully");

    let row = sqlx::query("SELECT COUNT(*) AS n FROM engagement_events WHERE unattributed = 1")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(row.try_get::<i64, _>("n").expect("n"), 1);

    let events = queued_events(&store).await;
    assert!(events.is_empty(), "no follow-up events for undeployed leads");
}

/// Deployment creates the single orchestration state and pushes every
/// step to the providers.
#[tokio::test]
async fn deployment_creates_state_and_pushes_steps() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;
    let lead = seed_lead(&store, tenant, campaign, "alice@acme.io").await;
    sqlx::query("UPDATE leads SET status = 'sequence_ready' WHERE id = ?1")
        .bind(lead)
        .execute(store.pool())
        .await
        .expect("lead status");
    let sequence = seed_sequence(&store, tenant, lead, campaign).await;

    let email = RecordingEmail::new();
    let linkedin = RecordingLinkedin::new();
    let handler = DeployHandler::new(
        store.clone(),
        registry(MockLlm::new(vec![]), email.clone(), linkedin.clone()),
        emitter(&store),
    );
    handler
        .handle(
            &ctx(&store),
            json!({"sequence_id": sequence, "tenant_id": tenant, "lead_id": lead}),
        )
        .await
        .expect("deploy");

    let state = store
        .get_orchestration_by_lead(tenant, lead)
        .await
        .expect("read")
        .expect("created");
    assert_eq!(state.status, OrchestrationStatus::Active);
    assert_eq!(state.email.step_total, 3);
    assert_eq!(state.linkedin.step_total, 2);
    assert!(state.email.started);

    let adds = email.calls_named("add");
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0]["fields"]["email_1_body"], "base 1");
    assert_eq!(adds[0]["fields"]["email_3_subject"], "s3");
    assert_eq!(linkedin.calls.lock().expect("lock").len(), 1);

    let lead_row = store.get_lead(tenant, lead).await.expect("lead");
    assert_eq!(lead_row.status, LeadStatus::Active);
    let campaign_row = store.get_campaign(tenant, campaign).await.expect("campaign");
    assert_eq!(campaign_row.leads_contacted, 1);
}

/// Connection-first strategies deploy into a waiting state with a timer
/// armed.
#[tokio::test]
async fn wait_for_connection_deploys_waiting() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;
    let lead = seed_lead(&store, tenant, campaign, "alice@acme.io").await;
    sqlx::query("UPDATE leads SET status = 'sequence_ready' WHERE id = ?1")
        .bind(lead)
        .execute(store.pool())
        .await
        .expect("lead status");
    let sequence = seed_sequence(&store, tenant, lead, campaign).await;
    let strategy = json!({
        "primary_angle": "funding", "cross_channel_triggers": [], "tone": "warm",
        "linkedin_first": false, "wait_for_connection": true, "connection_timeout_hours": 48
    });
    sqlx::query("UPDATE sequences SET strategy = ?1 WHERE id = ?2")
        .bind(strategy.to_string())
        .bind(sequence)
        .execute(store.pool())
        .await
        .expect("strategy");

    let handler = DeployHandler::new(
        store.clone(),
        registry(
            MockLlm::new(vec![]),
            RecordingEmail::new(),
            RecordingLinkedin::new(),
        ),
        emitter(&store),
    );
    handler
        .handle(
            &ctx(&store),
            json!({"sequence_id": sequence, "tenant_id": tenant, "lead_id": lead}),
        )
        .await
        .expect("deploy");

    let state = store
        .get_orchestration_by_lead(tenant, lead)
        .await
        .expect("read")
        .expect("created");
    assert_eq!(state.status, OrchestrationStatus::Waiting);
    assert_eq!(state.waiting_for.as_deref(), Some("linkedin_connection"));
    assert!(state.waiting_timeout_at.is_some());

    let row = sqlx::query("SELECT COUNT(*) AS n FROM runner_timers WHERE fired = 0")
        .fetch_one(store.pool())
        .await
        .expect("timers");
    assert_eq!(row.try_get::<i64, _>("n").expect("n"), 1);
}

/// Redelivered deployment events do not mint a second state.
#[tokio::test]
async fn deployment_is_idempotent() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;
    let lead = seed_lead(&store, tenant, campaign, "alice@acme.io").await;
    sqlx::query("UPDATE leads SET status = 'sequence_ready' WHERE id = ?1")
        .bind(lead)
        .execute(store.pool())
        .await
        .expect("lead status");
    let sequence = seed_sequence(&store, tenant, lead, campaign).await;

    let email = RecordingEmail::new();
    let handler = DeployHandler::new(
        store.clone(),
        registry(MockLlm::new(vec![]), email.clone(), RecordingLinkedin::new()),
        emitter(&store),
    );
    let payload = json!({"sequence_id": sequence, "tenant_id": tenant, "lead_id": lead});
    handler
        .handle(&ctx(&store), payload.clone())
        .await
        .expect("first deploy");
    handler
        .handle(&ctx(&store), payload)
        .await
        .expect("redelivery");

    assert_eq!(email.calls_named("add").len(), 1, "one provider push");
    let campaign_row = store.get_campaign(tenant, campaign).await.expect("campaign");
    assert_eq!(campaign_row.leads_contacted, 1);
}
