//! Cron evaluation and timer sweeping.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::Row;

use cadence::runner::cron::{due_jobs, sweep_timers, CronJob, SchedulerState};
use cadence::runner::Emitter;
use cadence::store::Store;

fn job(name: &str, cron: &str) -> CronJob {
    CronJob {
        name: name.to_owned(),
        cron: cron.to_owned(),
        event: "test.cron".to_owned(),
        payload: json!({}),
        enabled: true,
    }
}

#[test]
fn never_run_jobs_fire_on_first_match() {
    let jobs = vec![job("hourly", "0 0 * * * *")];
    let state = SchedulerState::new();
    let due = due_jobs(&jobs, &state, Utc::now());
    assert_eq!(due.len(), 1);
}

#[test]
fn recorded_runs_suppress_refiring_within_the_interval() {
    let jobs = vec![job("daily", "0 0 6 * * *")];
    let mut state = SchedulerState::new();
    let now = Utc::now();
    state.record_run("daily", now);
    let due = due_jobs(&jobs, &state, now);
    assert!(due.is_empty(), "a just-run daily job is not due again");
}

#[test]
fn disabled_and_invalid_jobs_are_skipped() {
    let mut disabled = job("off", "0 0 * * * *");
    disabled.enabled = false;
    let invalid = job("broken", "not a cron line");
    let state = SchedulerState::new();
    assert!(due_jobs(&[disabled, invalid], &state, Utc::now()).is_empty());
}

#[tokio::test]
async fn expired_timers_become_orchestration_events() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let past = Utc::now()
        .checked_sub_signed(Duration::minutes(5))
        .expect("past");

    emitter
        .arm_timer(
            1,
            42,
            past,
            &json!({
                "lead_id": 42,
                "tenant_id": 1,
                "event_type": "waiting_timeout",
                "channel": "orchestrator",
                "source_event_id": "timer-42",
            }),
        )
        .await
        .expect("arm");

    let fired = sweep_timers(&store, &emitter, Utc::now()).await.expect("sweep");
    assert_eq!(fired, 1);

    let row = sqlx::query("SELECT name, serialization_key FROM runner_events")
        .fetch_one(store.pool())
        .await
        .expect("queued event");
    assert_eq!(row.try_get::<String, _>("name").expect("name"), "orchestration.event");
    assert_eq!(
        row.try_get::<String, _>("serialization_key").expect("key"),
        "lead:42"
    );

    // Fired timers never re-fire.
    let again = sweep_timers(&store, &emitter, Utc::now()).await.expect("resweep");
    assert_eq!(again, 0);
}

#[tokio::test]
async fn future_timers_stay_armed() {
    let store = Store::in_memory().await.expect("store");
    let emitter = Emitter::new(store.pool().clone());
    let future = Utc::now()
        .checked_add_signed(Duration::hours(1))
        .expect("future");
    emitter
        .arm_timer(1, 7, future, &json!({"lead_id": 7}))
        .await
        .expect("arm");
    let fired = sweep_timers(&store, &emitter, Utc::now()).await.expect("sweep");
    assert_eq!(fired, 0);
}
