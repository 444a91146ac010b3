//! Stage error taxonomy.
//!
//! Every handler boundary classifies failures into exactly one of these
//! kinds before they cross a checkpoint. Business decisions (a lead
//! disqualified, a sequence rejected) are state transitions, never
//! errors.

use std::time::Duration;

use thiserror::Error;

use crate::providers::ProviderError;
use crate::store::StoreError;

/// Classified failure of a stage handler.
#[derive(Debug, Error)]
pub enum StageError {
    /// Precondition violated (campaign missing or inactive, tenant
    /// missing, malformed payload). The event is failed without retry and
    /// the operator notified.
    #[error("non-retriable: {0}")]
    NonRetriable(String),

    /// Transient failure (provider 5xx, timeout, 429). Retried with
    /// exponential backoff up to the handler's bounded attempt count,
    /// then escalated.
    #[error("retriable: {reason}")]
    Retriable {
        /// Last failure reason.
        reason: String,
        /// Backoff hint from the provider (e.g. Retry-After).
        backoff_hint: Option<Duration>,
    },
}

impl StageError {
    /// A non-retriable precondition failure.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::NonRetriable(reason.into())
    }

    /// A retriable transient failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Retriable {
            reason: reason.into(),
            backoff_hint: None,
        }
    }

    /// A retriable failure with a provider-supplied backoff hint.
    pub fn transient_with_hint(reason: impl Into<String>, hint: Duration) -> Self {
        Self::Retriable {
            reason: reason.into(),
            backoff_hint: Some(hint),
        }
    }

    /// The reason string recorded in the audit trail.
    pub fn reason(&self) -> &str {
        match self {
            Self::NonRetriable(reason) => reason,
            Self::Retriable { reason, .. } => reason,
        }
    }
}

impl From<StoreError> for StageError {
    /// Store failures default to retriable: the database is shared
    /// infrastructure and contention resolves. Conflicts re-read on the
    /// next attempt.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                Self::NonRetriable(format!("{entity} {id} not found"))
            }
            other => Self::transient(other.to_string()),
        }
    }
}

impl From<ProviderError> for StageError {
    /// Provider transport failures and 5xx/429 retry; everything else is
    /// a configuration or contract problem.
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { retry_after } => Self::Retriable {
                reason: "provider rate limited".to_owned(),
                backoff_hint: retry_after,
            },
            ProviderError::HttpStatus { status, ref body } if status >= 500 => {
                Self::transient(format!("provider {status}: {body}"))
            }
            ProviderError::Request(e) => Self::transient(format!("provider transport: {e}")),
            other => Self::NonRetriable(other.to_string()),
        }
    }
}
