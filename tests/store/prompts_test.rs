//! Prompt version lifecycle and A/B bookkeeping.

use cadence::store::prompts::PromptVersionStatus;
use cadence::store::Store;

async fn store_with_tenant() -> (Store, i64) {
    let store = Store::in_memory().await.expect("store");
    let tenant = sqlx::query("INSERT INTO tenants (name) VALUES ('t')")
        .execute(store.pool())
        .await
        .expect("tenant")
        .last_insert_rowid();
    (store, tenant)
}

#[tokio::test]
async fn versions_number_monotonically() {
    let (store, tenant) = store_with_tenant().await;
    let v1 = store
        .insert_prompt_version(tenant, "sequence-writer", "body one", PromptVersionStatus::Testing, &[])
        .await
        .expect("v1");
    let v2 = store
        .insert_prompt_version(tenant, "sequence-writer", "body two", PromptVersionStatus::Testing, &[1, 2])
        .await
        .expect("v2");
    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);
    assert_eq!(v2.injected_patterns, vec![1, 2]);
}

#[tokio::test]
async fn activation_swaps_the_single_active_version() {
    let (store, tenant) = store_with_tenant().await;
    let v1 = store
        .insert_prompt_version(tenant, "sequence-writer", "one", PromptVersionStatus::Testing, &[])
        .await
        .expect("v1");
    store
        .activate_prompt_version(tenant, "sequence-writer", v1.id)
        .await
        .expect("activate v1");

    let v2 = store
        .insert_prompt_version(tenant, "sequence-writer", "two", PromptVersionStatus::Testing, &[])
        .await
        .expect("v2");
    store
        .activate_prompt_version(tenant, "sequence-writer", v2.id)
        .await
        .expect("activate v2");

    let active = store
        .active_prompt_version(tenant, "sequence-writer")
        .await
        .expect("query")
        .expect("one active");
    assert_eq!(active.id, v2.id);

    let old = store.get_prompt_version(tenant, v1.id).await.expect("v1 reread");
    assert_eq!(old.status, PromptVersionStatus::Deprecated);
}

#[tokio::test]
async fn activation_is_per_prompt_name() {
    let (store, tenant) = store_with_tenant().await;
    let writer = store
        .insert_prompt_version(tenant, "sequence-writer", "w", PromptVersionStatus::Testing, &[])
        .await
        .expect("writer");
    let qualifier = store
        .insert_prompt_version(tenant, "qualification", "q", PromptVersionStatus::Testing, &[])
        .await
        .expect("qualifier");
    store
        .activate_prompt_version(tenant, "sequence-writer", writer.id)
        .await
        .expect("activate writer");
    store
        .activate_prompt_version(tenant, "qualification", qualifier.id)
        .await
        .expect("activate qualifier");

    assert!(store
        .active_prompt_version(tenant, "sequence-writer")
        .await
        .expect("writer active")
        .is_some());
    assert!(store
        .active_prompt_version(tenant, "qualification")
        .await
        .expect("qualifier active")
        .is_some());
}

#[tokio::test]
async fn ab_test_lifecycle() {
    let (store, tenant) = store_with_tenant().await;
    let control = store
        .insert_prompt_version(tenant, "sequence-writer", "c", PromptVersionStatus::Active, &[])
        .await
        .expect("control");
    let variant = store
        .insert_prompt_version(tenant, "sequence-writer", "v", PromptVersionStatus::Testing, &[])
        .await
        .expect("variant");

    store
        .create_ab_test(tenant, "sequence-writer", control.id, variant.id, 100, 30)
        .await
        .expect("create test");

    let running = store
        .running_ab_test(tenant, "sequence-writer")
        .await
        .expect("query")
        .expect("running");
    assert_eq!(running.control_version_id, control.id);
    assert_eq!(running.split_percent, 50);

    store
        .conclude_ab_test(tenant, running.id, Some(variant.id))
        .await
        .expect("conclude");
    assert!(store
        .running_ab_test(tenant, "sequence-writer")
        .await
        .expect("query")
        .is_none());
}
