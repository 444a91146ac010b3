//! Ingestion and qualification scenarios.

use serde_json::json;

use cadence::ingest::{IngestHandler, IngestSettings};
use cadence::qualify::{QualificationHandler, QualifySettings};
use cadence::runner::{names, EventHandler};
use cadence::store::Store;
use cadence::types::{LeadStatus, QualificationDecision};

use super::support::{
    ctx, emitter, queued_events, registry, seed_brand, seed_campaign, seed_tenant, MockLlm,
    RecordingEmail, RecordingLinkedin,
};

const YES_VERDICT: &str = r#"{"decision": "YES", "confidence": 0.85,
    "reasoning": "VP Marketing at a retail company squarely in the ICP",
    "icp_fit": "strong"}"#;

/// First pixel visit: lead inserted, composite scored, qualified YES,
/// handed to research.
#[tokio::test]
async fn pixel_first_visit_qualifies() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;

    let llm = MockLlm::new(vec![YES_VERDICT]);
    let registry = registry(
        llm.clone(),
        RecordingEmail::new(),
        RecordingLinkedin::new(),
    );
    let handler = QualificationHandler::new(
        store.clone(),
        registry,
        emitter(&store),
        QualifySettings::default(),
    );

    let payload = json!({
        "tenant_id": tenant,
        "campaign_id": campaign,
        "source": "pixel",
        "record": {
            "email": "alice@acme.io",
            "first_name": "Alice",
            "last_name": "Zhou",
            "job_title": "VP Marketing",
            "company": "Acme",
            "company_employee_count": 120,
            "company_industry": "retail",
            "page": "/pricing",
            "time_on_page": 45000,
        },
    });
    handler
        .handle(&ctx(&store), payload)
        .await
        .expect("qualification");

    let lead = store
        .find_lead_by_email(tenant, "alice@acme.io")
        .await
        .expect("lookup")
        .expect("lead created");
    assert_eq!(lead.visit_count, 1);
    assert_eq!(lead.intent_score, Some(55));
    assert_eq!(lead.status, LeadStatus::Researched);
    assert_eq!(lead.qualification_decision, Some(QualificationDecision::Yes));
    assert_eq!(llm.call_count(), 1);

    let events = queued_events(&store).await;
    let ready: Vec<_> = events
        .iter()
        .filter(|(name, _)| name == names::LEAD_READY_FOR_DEPLOYMENT)
        .collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].1["lead_id"], lead.id);
    assert_eq!(ready[0].1["qualification"]["decision"], "YES");
}

/// Returning visit number five with a prior YES: no LLM call, auto
/// qualification at confidence 0.9.
#[tokio::test]
async fn fifth_visit_auto_qualifies_without_the_llm() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;

    // Prior lead: four visits, already qualified YES.
    sqlx::query(
        "INSERT INTO leads (tenant_id, campaign_id, email, first_name, company_name, source, \
         visit_count, first_seen_at, last_seen_at, status, qualification_decision, \
         qualification_confidence, intent_score, intent_tier) \
         VALUES (?1, ?2, 'alice@acme.io', 'Alice', 'Acme', 'pixel', 4, datetime('now'), \
         datetime('now'), 'researched', 'YES', 0.85, 55, 'medium')",
    )
    .bind(tenant)
    .bind(campaign)
    .execute(store.pool())
    .await
    .expect("prior lead");

    let llm = MockLlm::new(vec![]);
    let registry = registry(
        llm.clone(),
        RecordingEmail::new(),
        RecordingLinkedin::new(),
    );
    let handler = QualificationHandler::new(
        store.clone(),
        registry,
        emitter(&store),
        QualifySettings::default(),
    );

    let payload = json!({
        "tenant_id": tenant,
        "campaign_id": campaign,
        "source": "pixel",
        "record": {"email": "alice@acme.io", "company": "Acme", "page": "/pricing"},
    });
    handler.handle(&ctx(&store), payload).await.expect("handle");

    let lead = store
        .find_lead_by_email(tenant, "alice@acme.io")
        .await
        .expect("lookup")
        .expect("lead");
    assert_eq!(lead.visit_count, 5);
    assert_eq!(llm.call_count(), 0, "auto qualification skips the LLM");

    let log = store
        .list_engagement_log_kinds(tenant, lead.id)
        .await
        .expect("log");
    assert!(log.contains(&"qualification.auto_qualified".to_owned()));

    let events = queued_events(&store).await;
    let ready: Vec<_> = events
        .iter()
        .filter(|(name, _)| name == names::LEAD_READY_FOR_DEPLOYMENT)
        .collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].1["qualification"]["confidence"], 0.9);
}

/// Returning visit in the 2..=4 band: bookkeeping only, no downstream
/// event.
#[tokio::test]
async fn mid_band_return_visit_only_logs() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "multi_channel", "pixel", &json!({})).await;

    sqlx::query(
        "INSERT INTO leads (tenant_id, campaign_id, email, company_name, source, visit_count, \
         first_seen_at, last_seen_at, status, qualification_decision) \
         VALUES (?1, ?2, 'bob@acme.io', 'Acme', 'pixel', 1, datetime('now'), datetime('now'), \
         'researched', 'YES')",
    )
    .bind(tenant)
    .bind(campaign)
    .execute(store.pool())
    .await
    .expect("prior lead");

    let llm = MockLlm::new(vec![]);
    let handler = QualificationHandler::new(
        store.clone(),
        registry(llm.clone(), RecordingEmail::new(), RecordingLinkedin::new()),
        emitter(&store),
        QualifySettings::default(),
    );
    handler
        .handle(
            &ctx(&store),
            json!({
                "tenant_id": tenant,
                "campaign_id": campaign,
                "source": "pixel",
                "record": {"email": "bob@acme.io", "company": "Acme"},
            }),
        )
        .await
        .expect("handle");

    let lead = store
        .find_lead_by_email(tenant, "bob@acme.io")
        .await
        .expect("lookup")
        .expect("lead");
    assert_eq!(lead.visit_count, 2);
    let log = store
        .list_engagement_log_kinds(tenant, lead.id)
        .await
        .expect("log");
    assert!(log.contains(&"visit.return".to_owned()));

    let events = queued_events(&store).await;
    assert!(
        !events
            .iter()
            .any(|(name, _)| name == names::LEAD_READY_FOR_DEPLOYMENT),
        "mid-band return visits emit nothing downstream"
    );
}

/// Intent records below the score floor never become leads or events.
#[tokio::test]
async fn low_intent_records_are_dropped_at_ingestion() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let config = json!({
        "records": [{
            "email": "weak@nowhere.io",
            "first_name": "Wes",
            "last_name": "Weak",
            "job_title": "Student assistant",
            "company": "Nowhere",
        }],
        "min_intent_score": 60,
    });
    let campaign = seed_campaign(&store, tenant, brand, "email_only", "intent", &config).await;

    let handler = IngestHandler::new(
        store.clone(),
        registry(
            MockLlm::new(vec![]),
            RecordingEmail::new(),
            RecordingLinkedin::new(),
        ),
        emitter(&store),
        IngestSettings::default(),
    );
    handler
        .handle(
            &ctx(&store),
            json!({"campaign_id": campaign, "tenant_id": tenant}),
        )
        .await
        .expect("ingest");

    let events = queued_events(&store).await;
    assert!(
        !events
            .iter()
            .any(|(name, _)| name == names::LEAD_INTENT_INGESTED),
        "a 42-point record must not be emitted"
    );
    assert!(store
        .find_lead_by_email(tenant, "weak@nowhere.io")
        .await
        .expect("lookup")
        .is_none());

    let campaign_row = store.get_campaign(tenant, campaign).await.expect("campaign");
    assert!(campaign_row.last_ingested_at.is_some());
}

/// Inactive campaigns are an ingestion barrier.
#[tokio::test]
async fn paused_campaign_fails_ingestion_fatally() {
    let store = Store::in_memory().await.expect("store");
    let tenant = seed_tenant(&store).await;
    let brand = seed_brand(&store, tenant).await;
    let campaign = seed_campaign(&store, tenant, brand, "email_only", "pixel", &json!({})).await;
    sqlx::query("UPDATE campaigns SET status = 'paused' WHERE id = ?1")
        .bind(campaign)
        .execute(store.pool())
        .await
        .expect("pause");

    let handler = IngestHandler::new(
        store.clone(),
        registry(
            MockLlm::new(vec![]),
            RecordingEmail::new(),
            RecordingLinkedin::new(),
        ),
        emitter(&store),
        IngestSettings::default(),
    );
    let err = handler
        .handle(
            &ctx(&store),
            json!({"campaign_id": campaign, "tenant_id": tenant}),
        )
        .await
        .expect_err("inactive campaign");
    assert!(matches!(
        err,
        cadence::runner::StageError::NonRetriable(_)
    ));
}
