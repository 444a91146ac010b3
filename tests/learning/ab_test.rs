//! A/B test arbitration against the store.

use chrono::Utc;

use cadence::learning::prompts::evaluate_ab_tests;
use cadence::store::outreach::{NewEngagementEvent, NewOutreachEvent};
use cadence::store::prompts::PromptVersionStatus;
use cadence::store::Store;
use cadence::types::{Channel, Sentiment, Tenant};

async fn seeded() -> (Store, Tenant, i64) {
    let store = Store::in_memory().await.expect("store");
    let tenant_id = sqlx::query("INSERT INTO tenants (name) VALUES ('t')")
        .execute(store.pool())
        .await
        .expect("tenant")
        .last_insert_rowid();
    let tenant = store.get_tenant(tenant_id).await.expect("tenant row");
    let lead = sqlx::query(
        "INSERT INTO leads (tenant_id, email, source, first_seen_at, last_seen_at) \
         VALUES (?1, 'a@b.c', 'pixel', datetime('now'), datetime('now'))",
    )
    .bind(tenant_id)
    .execute(store.pool())
    .await
    .expect("lead")
    .last_insert_rowid();
    (store, tenant, lead)
}

/// Open a running test with a small per-arm sample bar; returns
/// (control id, variant id).
async fn open_test(store: &Store, tenant_id: i64, min_sample: i64) -> (i64, i64) {
    let control = store
        .insert_prompt_version(tenant_id, "sequence-writer", "c", PromptVersionStatus::Testing, &[])
        .await
        .expect("control");
    store
        .activate_prompt_version(tenant_id, "sequence-writer", control.id)
        .await
        .expect("activate control");
    let variant = store
        .insert_prompt_version(tenant_id, "sequence-writer", "v", PromptVersionStatus::Testing, &[])
        .await
        .expect("variant");
    store
        .create_ab_test(tenant_id, "sequence-writer", control.id, variant.id, min_sample, 30)
        .await
        .expect("test");
    (control.id, variant.id)
}

/// Record `sends` outreach rows for a version, with `positives` of them
/// earning a positive reply.
async fn record_sends(store: &Store, tenant_id: i64, lead: i64, version: i64, sends: u32, positives: u32) {
    for i in 0..sends {
        let outreach_id = store
            .insert_outreach(&NewOutreachEvent {
                tenant_id,
                lead_id: lead,
                sequence_id: None,
                channel: Channel::Email,
                step_number: 1,
                subject: Some("s".to_owned()),
                body: "b".to_owned(),
                persona: None,
                relationship: None,
                top_trigger: None,
                strategy: serde_json::json!({}),
                prompt_version_id: Some(version),
                provider_campaign_id: None,
                provider_lead_id: None,
                thread_position: 1,
                sent_at: Utc::now(),
            })
            .await
            .expect("outreach");
        if i < positives {
            store
                .insert_engagement(&NewEngagementEvent {
                    tenant_id,
                    lead_id: Some(lead),
                    outreach_event_id: Some(outreach_id),
                    unattributed: false,
                    event_type: "positive_reply".to_owned(),
                    sentiment: Some(Sentiment::Positive),
                    interest_level: None,
                    days_since_first_email: Some(0),
                    provider_campaign_id: None,
                    provider_lead_id: None,
                    occurred_at: Utc::now(),
                })
                .await
                .expect("engagement");
        }
    }
}

async fn version_status(store: &Store, tenant_id: i64, version: i64) -> PromptVersionStatus {
    store
        .get_prompt_version(tenant_id, version)
        .await
        .expect("version")
        .status
}

#[tokio::test]
async fn zero_reply_tie_is_inconclusive_and_keeps_control() {
    let (store, tenant, lead) = seeded().await;
    let (control, variant) = open_test(&store, tenant.id, 5).await;
    // Both arms reach the sample bar without a single positive reply.
    record_sends(&store, tenant.id, lead, control, 5, 0).await;
    record_sends(&store, tenant.id, lead, variant, 5, 0).await;

    let concluded = evaluate_ab_tests(&store, &tenant).await.expect("evaluate");
    assert_eq!(concluded, 1);

    let running = store
        .running_ab_test(tenant.id, "sequence-writer")
        .await
        .expect("query");
    assert!(running.is_none(), "the test must conclude");
    assert_eq!(
        version_status(&store, tenant.id, control).await,
        PromptVersionStatus::Active,
        "control survives an inconclusive test"
    );
    assert_eq!(
        version_status(&store, tenant.id, variant).await,
        PromptVersionStatus::Deprecated,
        "the variant retires without a win"
    );
}

#[tokio::test]
async fn variant_with_clear_margin_wins() {
    let (store, tenant, lead) = seeded().await;
    let (control, variant) = open_test(&store, tenant.id, 5).await;
    record_sends(&store, tenant.id, lead, control, 10, 1).await;
    record_sends(&store, tenant.id, lead, variant, 10, 3).await;

    let concluded = evaluate_ab_tests(&store, &tenant).await.expect("evaluate");
    assert_eq!(concluded, 1);
    assert_eq!(
        version_status(&store, tenant.id, variant).await,
        PromptVersionStatus::Active
    );
    assert_eq!(
        version_status(&store, tenant.id, control).await,
        PromptVersionStatus::Deprecated
    );
}

#[tokio::test]
async fn control_keeps_the_crown_inside_the_margin() {
    let (store, tenant, lead) = seeded().await;
    let (control, variant) = open_test(&store, tenant.id, 5).await;
    // 20% vs 20%: inside the 10% relative margin either way.
    record_sends(&store, tenant.id, lead, control, 20, 4).await;
    record_sends(&store, tenant.id, lead, variant, 20, 4).await;

    evaluate_ab_tests(&store, &tenant).await.expect("evaluate");
    assert_eq!(
        version_status(&store, tenant.id, control).await,
        PromptVersionStatus::Active
    );
    assert_eq!(
        version_status(&store, tenant.id, variant).await,
        PromptVersionStatus::Deprecated
    );
}

#[tokio::test]
async fn short_sample_keeps_the_test_running() {
    let (store, tenant, lead) = seeded().await;
    let (control, variant) = open_test(&store, tenant.id, 50).await;
    record_sends(&store, tenant.id, lead, control, 3, 1).await;
    record_sends(&store, tenant.id, lead, variant, 3, 2).await;

    let concluded = evaluate_ab_tests(&store, &tenant).await.expect("evaluate");
    assert_eq!(concluded, 0);
    assert!(store
        .running_ab_test(tenant.id, "sequence-writer")
        .await
        .expect("query")
        .is_some());
}
