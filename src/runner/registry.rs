//! Handler registration: event name → handler, retry policy, concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{StageError, StepContext};

/// Bounded retry policy for a handler.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total delivery attempts (first try included).
    pub max_attempts: u32,
    /// Base of the exponential backoff.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next delivery. `attempt` is the 1-based attempt
    /// that just failed; a provider hint overrides the schedule.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let exponent = attempt.saturating_sub(1).min(8);
        self.base_backoff.saturating_mul(2u32.saturating_pow(exponent))
    }
}

/// A stage: an async function over one or more named events.
///
/// Handlers must be idempotent on their identifying key — delivery is
/// at-least-once. All state across suspension points goes through the
/// [`StepContext`] or the store.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event names this handler consumes.
    fn event_names(&self) -> &'static [&'static str];

    /// Retry policy; defaults to 3 attempts with 30s base backoff.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Concurrent invocations allowed for this handler.
    fn concurrency(&self) -> usize {
        8
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returns a classified [`StageError`]; anything else must not escape.
    async fn handle(&self, ctx: &StepContext, payload: serde_json::Value)
        -> Result<(), StageError>;
}

/// A registered handler with its shared concurrency gate.
#[derive(Clone)]
pub struct Registered {
    /// The handler.
    pub handler: Arc<dyn EventHandler>,
    /// Per-handler concurrency cap, shared across its event names.
    pub semaphore: Arc<Semaphore>,
}

/// Event name → registered handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Registered>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under each of its event names. A handler
    /// registered under several names shares one concurrency gate.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let semaphore = Arc::new(Semaphore::new(handler.concurrency()));
        for name in handler.event_names() {
            self.handlers.insert(
                name,
                Registered {
                    handler: Arc::clone(&handler),
                    semaphore: Arc::clone(&semaphore),
                },
            );
        }
    }

    /// Resolve the handler for an event name.
    pub fn get(&self, name: &str) -> Option<&Registered> {
        self.handlers.get(name)
    }

    /// Registered event names (for startup logging).
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
