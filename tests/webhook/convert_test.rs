//! Provider webhook → internal event conversion.

use serde_json::json;
use sqlx::Row;

use cadence::runner::Emitter;
use cadence::store::Store;
use cadence::types::Channel;
use cadence::webhook::{ingest_email_webhook, ingest_linkedin_webhook, internal_event};

async fn seeded() -> (Store, Emitter, i64, i64) {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
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
    (store, emitter, tenant, lead)
}

#[tokio::test]
async fn email_webhook_resolves_by_email_and_enqueues() {
    let (store, emitter, tenant, lead) = seeded().await;
    let payload = json!({
        "event": "opened",
        "email": "a@b.c",
        "event_id": "wh-1",
        "campaign_id": "pc-1",
        "lead_id": "pl-1",
    });
    let id = ingest_email_webhook(&store, &emitter, tenant, &payload)
        .await
        .expect("convert")
        .expect("resolved");

    let row = sqlx::query("SELECT name, payload FROM runner_events WHERE id = ?1")
        .bind(&id)
        .fetch_one(store.pool())
        .await
        .expect("queued");
    assert_eq!(
        row.try_get::<String, _>("name").expect("name"),
        "orchestration.event"
    );
    let event: serde_json::Value =
        serde_json::from_str(row.try_get("payload").expect("payload")).expect("json");
    assert_eq!(event["event_type"], "email_opened");
    assert_eq!(event["lead_id"], lead);
    assert_eq!(event["source_event_id"], "wh-1");
}

#[tokio::test]
async fn unknown_webhook_event_is_malformed() {
    let (store, emitter, tenant, _lead) = seeded().await;
    let payload = json!({"event": "teleported", "email": "a@b.c"});
    let result = ingest_email_webhook(&store, &emitter, tenant, &payload).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unresolvable_webhook_stores_unattributed_engagement() {
    let (store, emitter, tenant, _lead) = seeded().await;
    let payload = json!({
        "event": "replied",
        "email": "stranger@nowhere.io",
        "campaign_id": "no-such",
        "lead_id": "no-such",
        "sentiment": "positive",
    });
    let result = ingest_email_webhook(&store, &emitter, tenant, &payload)
        .await
        .expect("convert");
    assert!(result.is_none());

    let row = sqlx::query("SELECT COUNT(*) AS n FROM engagement_events WHERE unattributed = 1")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(row.try_get::<i64, _>("n").expect("n"), 1);
}

#[tokio::test]
async fn linkedin_webhook_maps_connected() {
    let (store, emitter, tenant, lead) = seeded().await;
    let payload = json!({"event": "connected", "email": "a@b.c", "event_id": "wh-li-1"});
    let id = ingest_linkedin_webhook(&store, &emitter, tenant, &payload)
        .await
        .expect("convert")
        .expect("resolved");

    let row = sqlx::query("SELECT payload FROM runner_events WHERE id = ?1")
        .bind(&id)
        .fetch_one(store.pool())
        .await
        .expect("queued");
    let event: serde_json::Value =
        serde_json::from_str(row.try_get("payload").expect("payload")).expect("json");
    assert_eq!(event["event_type"], "linkedin_connected");
    assert_eq!(event["channel"], "linkedin");
    assert_eq!(event["lead_id"], lead);
}

#[test]
fn internal_event_generates_a_source_id_when_missing() {
    let event = internal_event(1, 2, "email_opened", Channel::Email, &json!({}));
    let source = event["source_event_id"].as_str().expect("id");
    assert!(!source.is_empty());
}
