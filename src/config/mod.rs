//! Configuration loading.
//!
//! Exactly two required roots: the store connection and the provider
//! registry. Everything tenant-specific lives in the store. Precedence:
//! env vars > TOML file > defaults. The config file path comes from
//! `$CADENCE_CONFIG_PATH`, defaulting to `./cadence.toml`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::providers::registry::ProvidersConfig;
use crate::runner::cron::CronJob;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Store connection.
    pub database: DatabaseConfig,
    /// Provider registry configuration.
    pub providers: ProvidersConfig,
    /// Worker tuning.
    pub worker: WorkerConfig,
    /// Cron jobs; empty means the built-in defaults.
    pub cron: Vec<CronJob>,
    /// Ingestion tunables.
    pub ingest: IngestConfig,
    /// Qualification tunables.
    pub qualification: QualificationConfig,
    /// Log directory for production mode.
    pub logs_dir: String,
}

/// Store connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "cadence.db".to_owned(),
        }
    }
}

/// Worker tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queue poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Cron/timer tick interval in seconds.
    pub scheduler_tick_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            scheduler_tick_secs: 30,
        }
    }
}

/// Ingestion tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Minimum intent score kept from intent feeds.
    pub min_intent_score: u32,
    /// Rank cut-off for the auto-research flag.
    pub auto_research_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_intent_score: 60,
            auto_research_limit: 20,
        }
    }
}

/// Qualification tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualificationConfig {
    /// REVIEW decisions fall through to YES when set.
    pub auto_approve_review: bool,
}

impl Default for QualificationConfig {
    fn default() -> Self {
        Self {
            auto_approve_review: true,
        }
    }
}

impl CadenceConfig {
    /// Load configuration with precedence env > file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but fails to parse.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: CadenceConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(CadenceConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (testable).
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("CADENCE_CONFIG_PATH")
            .map_or_else(|| PathBuf::from("cadence.toml"), PathBuf::from)
    }

    /// Apply environment overrides. Takes a resolver function so tests
    /// avoid mutating the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(path) = env("CADENCE_DB_PATH") {
            self.database.path = path;
        }
        if let Some(dir) = env("CADENCE_LOGS_DIR") {
            self.logs_dir = dir;
        }
        if let Some(url) = env("CADENCE_NOTIFY_WEBHOOK") {
            self.providers.notify_webhook = Some(url);
        }
        if let Some(v) = env("CADENCE_MIN_INTENT_SCORE") {
            match v.parse() {
                Ok(n) => self.ingest.min_intent_score = n,
                Err(_) => tracing::warn!(
                    var = "CADENCE_MIN_INTENT_SCORE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// The effective log directory.
    pub fn logs_dir(&self) -> PathBuf {
        if self.logs_dir.is_empty() {
            PathBuf::from("logs")
        } else {
            PathBuf::from(&self.logs_dir)
        }
    }

    /// Configured cron jobs, falling back to the built-in schedule.
    pub fn cron_jobs(&self) -> Vec<CronJob> {
        if !self.cron.is_empty() {
            return self.cron.clone();
        }
        default_cron_jobs()
    }
}

/// The built-in cron schedule: daily ingestion scans per source kind,
/// the daily learning run, and the daily summary.
pub fn default_cron_jobs() -> Vec<CronJob> {
    let scan = |name: &str, cron: &str, kind: &str| CronJob {
        name: name.to_owned(),
        cron: cron.to_owned(),
        event: crate::runner::names::CAMPAIGN_INGEST_SCAN.to_owned(),
        payload: serde_json::json!({"source_kind": kind}),
        enabled: true,
    };
    vec![
        scan("ingest-pixel", "0 0 6 * * *", "pixel"),
        scan("ingest-intent", "0 15 6 * * *", "intent"),
        scan("ingest-apollo", "0 30 6 * * *", "apollo"),
        CronJob {
            name: "learning-daily".to_owned(),
            cron: "0 0 7 * * *".to_owned(),
            event: crate::runner::names::LEARNING_SCAN.to_owned(),
            payload: serde_json::Value::Null,
            enabled: true,
        },
        CronJob {
            name: "daily-summary".to_owned(),
            cron: "0 0 17 * * *".to_owned(),
            event: crate::runner::names::DAILY_SUMMARY.to_owned(),
            payload: serde_json::Value::Null,
            enabled: true,
        },
    ]
}
