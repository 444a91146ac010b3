//! Cron evaluation and wait-timer sweeping.
//!
//! Jobs are declared in config as (name, cron expression, event, payload).
//! Each scheduler tick emits the events of jobs whose next occurrence
//! after their last run is in the past. The timer sweeper promotes
//! expired orchestration waits into `orchestration.event` deliveries.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::Row;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::Store;

use super::{names, Emitter, RunnerError};

/// One configured cron job.
#[derive(Debug, Clone, Deserialize)]
pub struct CronJob {
    /// Job name (unique).
    pub name: String,
    /// Standard cron expression.
    pub cron: String,
    /// Event emitted when due.
    pub event: String,
    /// Payload carried by the event.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Disabled jobs are skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Tracks last-fired timestamps per job.
#[derive(Debug, Default)]
pub struct SchedulerState {
    last_run: HashMap<String, DateTime<Utc>>,
}

impl SchedulerState {
    /// Fresh state with no recorded runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a job fired at `at`.
    pub fn record_run(&mut self, name: &str, at: DateTime<Utc>) {
        self.last_run.insert(name.to_owned(), at);
    }
}

/// Jobs due this tick: enabled, with a cron occurrence between their last
/// run and now.
pub fn due_jobs<'a>(
    jobs: &'a [CronJob],
    state: &SchedulerState,
    now: DateTime<Utc>,
) -> Vec<&'a CronJob> {
    jobs.iter()
        .filter(|job| {
            if !job.enabled {
                return false;
            }
            let schedule = match cron::Schedule::from_str(&job.cron) {
                Ok(s) => s,
                Err(e) => {
                    warn!(job = %job.name, cron = %job.cron, error = %e,
                          "invalid cron expression, skipping job");
                    return false;
                }
            };
            // Never-run jobs fire on their first matching occurrence.
            let after = state
                .last_run
                .get(&job.name)
                .copied()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            schedule.after(&after).take(1).any(|next| next <= now)
        })
        .collect()
}

/// Run the scheduler until shutdown: evaluates jobs and sweeps timers
/// every `tick`.
pub async fn run_scheduler(
    store: Store,
    emitter: Emitter,
    jobs: Vec<CronJob>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = SchedulerState::new();
    info!(jobs = jobs.len(), "cron scheduler started");
    loop {
        if *shutdown.borrow() {
            info!("cron scheduler shutting down");
            return;
        }
        let now = Utc::now();
        for job in due_jobs(&jobs, &state, now) {
            debug!(job = %job.name, event = %job.event, "cron job due");
            if let Err(err) = emitter.emit(&job.event, &job.payload).await {
                warn!(job = %job.name, error = %err, "cron emit failed");
            }
            state.record_run(&job.name, now);
        }
        if let Err(err) = sweep_timers(&store, &emitter, now).await {
            warn!(error = %err, "timer sweep failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Deliver `waiting_timeout` events for every expired, unfired timer.
/// Returns how many timers fired.
///
/// # Errors
///
/// Returns [`RunnerError`] on queue or timer-table access failure.
pub async fn sweep_timers(
    store: &Store,
    emitter: &Emitter,
    now: DateTime<Utc>,
) -> Result<usize, RunnerError> {
    let rows = sqlx::query(
        "SELECT id, payload FROM runner_timers WHERE fired = 0 AND fire_at <= ?1 ORDER BY fire_at",
    )
    .bind(now.to_rfc3339())
    .fetch_all(store.pool())
    .await?;

    let mut fired = 0usize;
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let raw: String = row.try_get("payload")?;
        let payload: serde_json::Value = serde_json::from_str(&raw)?;

        // Mark fired first so a crash cannot double-deliver; the wait
        // clear itself is idempotent on the orchestration side.
        let marked = sqlx::query("UPDATE runner_timers SET fired = 1 WHERE id = ?1 AND fired = 0")
            .bind(id)
            .execute(store.pool())
            .await?;
        if marked.rows_affected() == 0 {
            continue;
        }
        emitter.emit(names::ORCHESTRATION_EVENT, &payload).await?;
        fired = fired.saturating_add(1);
    }
    Ok(fired)
}
