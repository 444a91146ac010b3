//! Schema bootstrap.

use sqlx::Row;

use cadence::store::Store;

#[tokio::test]
async fn schema_applies_cleanly() {
    let store = Store::in_memory().await.expect("in-memory store");
    let row = sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table'")
        .fetch_one(store.pool())
        .await
        .expect("query sqlite_master");
    let n: i64 = row.try_get("n").expect("count");
    assert!(n >= 20, "expected the full schema, found {n} tables");
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let store = Store::in_memory().await.expect("in-memory store");
    store.migrate().await.expect("first re-run");
    store.migrate().await.expect("second re-run");
}

#[tokio::test]
async fn on_disk_database_works() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cadence-test.db");
    let store = Store::connect(path.to_str().expect("utf8 path"))
        .await
        .expect("on-disk store");
    store.migrate().await.expect("migrate");
    assert!(path.exists());
}
