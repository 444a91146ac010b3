//! Orchestration state uniqueness, locking, and event dedup.

use serde_json::json;

use cadence::store::orchestration::NewOrchestrationEvent;
use cadence::store::{Store, StoreError};
use cadence::types::{CampaignMode, Channel, OrchestrationStatus};

async fn seeded() -> (Store, i64, i64, i64, i64) {
    let store = Store::in_memory().await.expect("store");
    let tenant = sqlx::query("INSERT INTO tenants (name) VALUES ('t')")
        .execute(store.pool())
        .await
        .expect("tenant")
        .last_insert_rowid();
    let brand = sqlx::query("INSERT INTO brands (tenant_id, name) VALUES (?1, 'b')")
        .bind(tenant)
        .execute(store.pool())
        .await
        .expect("brand")
        .last_insert_rowid();
    let campaign = sqlx::query(
        "INSERT INTO campaigns (tenant_id, brand_id, name, status) VALUES (?1, ?2, 'c', 'active')",
    )
    .bind(tenant)
    .bind(brand)
    .execute(store.pool())
    .await
    .expect("campaign")
    .last_insert_rowid();
    let lead = sqlx::query(
        "INSERT INTO leads (tenant_id, email, source, first_seen_at, last_seen_at) \
         VALUES (?1, 'a@b.c', 'pixel', datetime('now'), datetime('now'))",
    )
    .bind(tenant)
    .execute(store.pool())
    .await
    .expect("lead")
    .last_insert_rowid();
    let sequence = sqlx::query(
        "INSERT INTO sequences (tenant_id, lead_id, campaign_id, mode) \
         VALUES (?1, ?2, ?3, 'multi_channel')",
    )
    .bind(tenant)
    .bind(lead)
    .bind(campaign)
    .execute(store.pool())
    .await
    .expect("sequence")
    .last_insert_rowid();
    (store, tenant, lead, sequence, campaign)
}

fn incoming(tenant: i64, lead: i64, source_event_id: &str) -> NewOrchestrationEvent {
    NewOrchestrationEvent {
        tenant_id: tenant,
        lead_id: lead,
        sequence_id: None,
        event_type: "email_opened".to_owned(),
        channel: Channel::Email,
        step_number: 0,
        data: json!({}),
        decision: None,
        reason: None,
        source_event_id: source_event_id.to_owned(),
    }
}

#[tokio::test]
async fn at_most_one_state_per_lead() {
    let (store, tenant, lead, sequence, campaign) = seeded().await;
    let (_, created) = store
        .create_orchestration_if_absent(tenant, lead, sequence, campaign, CampaignMode::MultiChannel, 7, 4)
        .await
        .expect("create");
    assert!(created);

    let (state, created_again) = store
        .create_orchestration_if_absent(tenant, lead, sequence, campaign, CampaignMode::MultiChannel, 7, 4)
        .await
        .expect("second create");
    assert!(!created_again);
    assert_eq!(state.status, OrchestrationStatus::Pending);
}

#[tokio::test]
async fn optimistic_lock_rejects_stale_writers() {
    let (store, tenant, lead, sequence, campaign) = seeded().await;
    let (state, _) = store
        .create_orchestration_if_absent(tenant, lead, sequence, campaign, CampaignMode::MultiChannel, 7, 4)
        .await
        .expect("create");

    let mut first = state.clone();
    first.status = OrchestrationStatus::Active;
    store.save_orchestration(&first).await.expect("first save");

    // A second writer holding the old version must conflict.
    let mut stale = state;
    stale.status = OrchestrationStatus::Paused;
    let err = store.save_orchestration(&stale).await.expect_err("conflict");
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[tokio::test]
async fn duplicate_source_events_are_dropped() {
    let (store, tenant, lead, sequence, campaign) = seeded().await;
    let (state, _) = store
        .create_orchestration_if_absent(tenant, lead, sequence, campaign, CampaignMode::MultiChannel, 7, 4)
        .await
        .expect("create");

    let fresh = store
        .apply_orchestration_outcome(&state, &incoming(tenant, lead, "evt-1"), &[])
        .await
        .expect("first apply");
    assert!(fresh);

    // Same source event redelivered: dropped, state untouched.
    let reread = store
        .get_orchestration_by_lead(tenant, lead)
        .await
        .expect("reread")
        .expect("exists");
    let duplicate = store
        .apply_orchestration_outcome(&reread, &incoming(tenant, lead, "evt-1"), &[])
        .await
        .expect("duplicate apply");
    assert!(!duplicate);
}

#[tokio::test]
async fn decision_rows_append_with_the_incoming_event() {
    let (store, tenant, lead, sequence, campaign) = seeded().await;
    let (state, _) = store
        .create_orchestration_if_absent(tenant, lead, sequence, campaign, CampaignMode::MultiChannel, 7, 4)
        .await
        .expect("create");

    let mut decision = incoming(tenant, lead, "evt-2");
    decision.event_type = "cross_channel_trigger".to_owned();
    decision.decision = Some("conditional_copy_sync".to_owned());

    store
        .apply_orchestration_outcome(&state, &incoming(tenant, lead, "evt-2"), &[decision])
        .await
        .expect("apply");

    let events = store
        .list_orchestration_events(tenant, lead)
        .await
        .expect("list");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "email_opened");
    assert_eq!(events[1].event_type, "cross_channel_trigger");
    assert_eq!(events[1].decision.as_deref(), Some("conditional_copy_sync"));
}
