//! Lead upsert, merge, and visit bookkeeping.

use chrono::Utc;

use cadence::store::Store;
use cadence::types::{LeadSource, LeadStatus, NormalizedLead, QualificationDecision};

async fn store_with_tenant() -> (Store, i64) {
    let store = Store::in_memory().await.expect("store");
    let result = sqlx::query("INSERT INTO tenants (name) VALUES ('t1')")
        .execute(store.pool())
        .await
        .expect("tenant");
    (store, result.last_insert_rowid())
}

fn record(email: &str) -> NormalizedLead {
    NormalizedLead {
        email: Some(email.to_owned()),
        first_name: Some("Alice".to_owned()),
        company_name: Some("Acme".to_owned()),
        ..NormalizedLead::default()
    }
}

#[tokio::test]
async fn first_sight_creates_the_lead() {
    let (store, tenant) = store_with_tenant().await;
    let upsert = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("upsert");
    assert!(upsert.created);
    assert_eq!(upsert.lead.visit_count, 1);
    assert_eq!(upsert.lead.status, LeadStatus::Ingested);
    assert_eq!(upsert.lead.source, LeadSource::Pixel);
}

#[tokio::test]
async fn pixel_resight_increments_visits_but_apollo_does_not() {
    let (store, tenant) = store_with_tenant().await;
    store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("insert");

    let second = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("pixel resight");
    assert!(!second.created);
    assert_eq!(second.lead.visit_count, 2);

    let third = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Apollo, Utc::now())
        .await
        .expect("apollo resight");
    assert_eq!(third.lead.visit_count, 2, "non-pixel sources never bump visits");
}

#[tokio::test]
async fn source_upgrades_but_never_downgrades() {
    let (store, tenant) = store_with_tenant().await;
    store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Apollo, Utc::now())
        .await
        .expect("insert");

    let upgraded = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("upgrade");
    assert_eq!(upgraded.lead.source, LeadSource::Pixel);

    let unchanged = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Manual, Utc::now())
        .await
        .expect("no downgrade");
    assert_eq!(unchanged.lead.source, LeadSource::Pixel);
}

#[tokio::test]
async fn merge_fills_missing_fields_only() {
    let (store, tenant) = store_with_tenant().await;
    store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("insert");

    let mut richer = record("a@acme.io");
    richer.first_name = Some("Alicia".to_owned());
    richer.job_title = Some("VP Marketing".to_owned());
    let merged = store
        .upsert_lead(tenant, None, &richer, LeadSource::Intent, Utc::now())
        .await
        .expect("merge");
    // Existing values win; gaps fill in.
    assert_eq!(merged.lead.first_name.as_deref(), Some("Alice"));
    assert_eq!(merged.lead.job_title.as_deref(), Some("VP Marketing"));
}

#[tokio::test]
async fn duplicate_email_is_tenant_scoped() {
    let (store, tenant) = store_with_tenant().await;
    let other = sqlx::query("INSERT INTO tenants (name) VALUES ('t2')")
        .execute(store.pool())
        .await
        .expect("tenant 2")
        .last_insert_rowid();

    store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("tenant 1 lead");
    let second = store
        .upsert_lead(other, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("tenant 2 lead");
    assert!(second.created, "same email in another tenant is a new lead");
}

#[tokio::test]
async fn qualification_fields_persist() {
    let (store, tenant) = store_with_tenant().await;
    let upsert = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("insert");

    store
        .set_qualification(
            tenant,
            upsert.lead.id,
            QualificationDecision::Yes,
            0.9,
            "title match",
            Some("strong"),
        )
        .await
        .expect("set qualification");

    let lead = store.get_lead(tenant, upsert.lead.id).await.expect("read");
    assert_eq!(lead.qualification_decision, Some(QualificationDecision::Yes));
    assert_eq!(lead.qualification_confidence, Some(0.9));
    assert_eq!(lead.icp_fit.as_deref(), Some("strong"));
}

#[tokio::test]
async fn engagement_log_appends_in_order() {
    let (store, tenant) = store_with_tenant().await;
    let upsert = store
        .upsert_lead(tenant, None, &record("a@acme.io"), LeadSource::Pixel, Utc::now())
        .await
        .expect("insert");

    for kind in ["lead.ingested", "visit.return", "qualification.auto_qualified"] {
        store
            .append_engagement_log(tenant, upsert.lead.id, kind, &serde_json::json!({}))
            .await
            .expect("append");
    }
    let kinds = store
        .list_engagement_log_kinds(tenant, upsert.lead.id)
        .await
        .expect("list");
    assert_eq!(
        kinds,
        vec!["lead.ingested", "visit.return", "qualification.auto_qualified"]
    );
}
