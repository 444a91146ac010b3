//! Outreach capture and engagement resolution against the store.

use chrono::Utc;
use sqlx::Row;

use cadence::attribution::{record_engagement, record_outreach, EngagementInput};
use cadence::store::outreach::NewOutreachEvent;
use cadence::store::Store;
use cadence::types::{Channel, Sentiment};

async fn seeded() -> (Store, i64, i64) {
    let store = Store::in_memory().await.expect("store");
    let tenant = sqlx::query("INSERT INTO tenants (name) VALUES ('t')")
        .execute(store.pool())
        .await
        .expect("tenant")
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
    (store, tenant, lead)
}

fn outreach(tenant: i64, lead: i64) -> NewOutreachEvent {
    NewOutreachEvent {
        tenant_id: tenant,
        lead_id: lead,
        sequence_id: None,
        channel: Channel::Email,
        step_number: 1,
        subject: Some("Congrats on the round?".to_owned()),
        body: "Noticed your funding. Worth a quick call next week?".to_owned(),
        persona: Some("Sales leader".to_owned()),
        relationship: Some("cold_outreach".to_owned()),
        top_trigger: Some("recent funding".to_owned()),
        strategy: serde_json::json!({"tone": "warm"}),
        prompt_version_id: None,
        provider_campaign_id: Some("pc-1".to_owned()),
        provider_lead_id: Some("pl-1".to_owned()),
        thread_position: 1,
        sent_at: Utc::now(),
    }
}

#[tokio::test]
async fn outreach_is_tagged_on_insert() {
    let (store, tenant, lead) = seeded().await;
    let outreach_id = record_outreach(&store, &outreach(tenant, lead))
        .await
        .expect("record");

    let rows = sqlx::query(
        "SELECT element_type, element_value FROM outreach_element_tags \
         WHERE outreach_event_id = ?1 ORDER BY position_in_email",
    )
    .bind(outreach_id)
    .fetch_all(store.pool())
    .await
    .expect("tags");
    assert!(rows.len() >= 4, "subject, opener, cta, tone, length expected");

    let types: Vec<String> = rows
        .iter()
        .map(|r| r.try_get::<String, _>("element_type").expect("type"))
        .collect();
    assert!(types.contains(&"subject_kind".to_owned()));
    assert!(types.contains(&"opener_kind".to_owned()));
}

#[tokio::test]
async fn duplicate_tags_are_ignored() {
    let (store, tenant, lead) = seeded().await;
    let event = outreach(tenant, lead);
    let outreach_id = record_outreach(&store, &event).await.expect("record");

    // Re-tagging the same outreach (replay) must not duplicate rows.
    let tags = cadence::attribution::tagger::tag_email(event.subject.as_deref(), &event.body);
    store
        .insert_element_tags(tenant, outreach_id, &tags)
        .await
        .expect("replay tags");

    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM outreach_element_tags WHERE outreach_event_id = ?1",
    )
    .bind(outreach_id)
    .fetch_one(store.pool())
    .await
    .expect("count");
    let n: i64 = row.try_get("n").expect("n");
    assert_eq!(n, i64::try_from(tags.len()).expect("fits"));
}

#[tokio::test]
async fn engagement_resolves_through_provider_ids() {
    let (store, tenant, lead) = seeded().await;
    record_outreach(&store, &outreach(tenant, lead))
        .await
        .expect("outreach");

    let engagement_id = record_engagement(
        &store,
        &EngagementInput {
            tenant_id: tenant,
            lead_id: None,
            event_type: "reply".to_owned(),
            sentiment: Some(Sentiment::Positive),
            interest_level: Some("hot".to_owned()),
            provider_campaign_id: Some("pc-1".to_owned()),
            provider_lead_id: Some("pl-1".to_owned()),
            occurred_at: Utc::now(),
        },
    )
    .await
    .expect("engagement");

    let row = sqlx::query(
        "SELECT unattributed, lead_id, days_since_first_email FROM engagement_events \
         WHERE id = ?1",
    )
    .bind(engagement_id)
    .fetch_one(store.pool())
    .await
    .expect("row");
    assert_eq!(row.try_get::<i64, _>("unattributed").expect("flag"), 0);
    assert_eq!(row.try_get::<i64, _>("lead_id").expect("lead"), lead);
    assert_eq!(row.try_get::<i64, _>("days_since_first_email").expect("days"), 0);
}

#[tokio::test]
async fn unresolvable_engagement_is_stored_unattributed() {
    let (store, tenant, _lead) = seeded().await;
    let engagement_id = record_engagement(
        &store,
        &EngagementInput {
            tenant_id: tenant,
            lead_id: None,
            event_type: "open".to_owned(),
            sentiment: None,
            interest_level: None,
            provider_campaign_id: Some("unknown".to_owned()),
            provider_lead_id: Some("unknown".to_owned()),
            occurred_at: Utc::now(),
        },
    )
    .await
    .expect("stored anyway");

    let row = sqlx::query("SELECT unattributed FROM engagement_events WHERE id = ?1")
        .bind(engagement_id)
        .fetch_one(store.pool())
        .await
        .expect("row");
    assert_eq!(row.try_get::<i64, _>("unattributed").expect("flag"), 1);
}
