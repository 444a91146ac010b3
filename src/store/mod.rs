//! Transactional state store over SQLite.
//!
//! [`Store`] is the sole gateway to the database and the only shared state
//! between workers; nothing in memory survives a restart. Every query is
//! tenant-scoped. Submodules hold the per-aggregate access methods as
//! additional `impl Store` blocks.

pub mod campaigns;
pub mod leads;
pub mod orchestration;
pub mod outreach;
pub mod patterns;
pub mod prompts;
pub mod rag;
pub mod research;
pub mod sequences;
pub mod tenants;
pub mod triggers;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::types::InvalidEnum;

/// Bootstrap schema applied on `migrate` and at worker startup.
const SCHEMA_SQL: &str = include_str!("../../migrations/001_schema.sql");

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// JSON column (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Text-enum column held an unrecognised value.
    #[error(transparent)]
    InvalidEnum(#[from] InvalidEnum),
    /// Timestamp column could not be parsed.
    #[error("invalid timestamp in {field}: {value}")]
    Timestamp {
        /// Column name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// Row not found.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Row id.
        id: i64,
    },
    /// Optimistic-lock version mismatch; caller should re-read and retry.
    #[error("concurrent update conflict on {entity}")]
    Conflict {
        /// Entity kind.
        entity: &'static str,
    },
}

impl StoreError {
    /// Whether `err` is a SQLite unique-constraint violation. Races on
    /// upsert targets are caught and converted to read-then-update.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => {
                let code = db.code();
                matches!(code.as_deref(), Some("2067") | Some("1555"))
                    || db.message().contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }
}

/// Shared handle to the SQLite pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot connect.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. In-memory databases are per-connection,
    /// so the pool is limited to a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot connect.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the bootstrap schema. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on any statement failure.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, for the runner's queue tables.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ── Timestamp codec ─────────────────────────────────────────────

/// Serialize a timestamp for a TEXT column.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a TEXT timestamp written either by [`ts`] or by SQLite's
/// `datetime('now')` default.
pub(crate) fn parse_ts(field: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(StoreError::Timestamp {
        field,
        value: value.to_owned(),
    })
}

/// Parse an optional TEXT timestamp column.
pub(crate) fn parse_ts_opt(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_ts(field, v)).transpose()
}
