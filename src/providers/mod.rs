//! Provider ports: narrow interfaces to every external service.
//!
//! The core depends on these traits, never on a concrete vendor. Tenants
//! select adapters by name through the [`registry::ProviderRegistry`];
//! there is no compile-time branching on provider identity.
//!
//! LLM adapters implemented here:
//! - [`anthropic::AnthropicClient`] — Anthropic `/v1/messages` API
//! - [`openai::OpenAiClient`] — OpenAI `/v1/chat/completions` API

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod email;
pub mod enrich;
pub mod linkedin;
pub mod notify;
pub mod openai;
pub mod registry;

pub use email::{EmailLead, EmailSender, EmailWebhookKind, ReceivedReply};
pub use enrich::{EnrichmentFetcher, ProspectQuery, ProspectSearch};
pub use linkedin::{LinkedInAutomation, LinkedInWebhookKind};
pub use notify::Notifier;
pub use registry::ProviderRegistry;

// ---------------------------------------------------------------------------
// LLM types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction.
    System,
    /// Human / pipeline message.
    User,
    /// Model response.
    Assistant,
}

/// One message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: ChatRole,
    /// Plain-text content.
    pub content: String,
}

impl ChatMessage {
    /// A user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System prompt, injected before messages.
    pub system: Option<String>,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Extended-thinking token budget, where the provider supports it.
    pub thinking_budget: Option<u32>,
}

/// Why a completion stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal end of turn.
    EndTurn,
    /// Token cap reached.
    MaxTokens,
    /// Provider-specific other reason.
    Other(String),
}

/// Token usage for budget accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Generated tokens.
    pub output_tokens: u32,
}

/// A chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated text.
    pub content: String,
    /// Token usage.
    pub usage: TokenUsage,
    /// Stop reason.
    pub finish: FinishReason,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by provider adapters.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream responded with a non-success status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Upstream rate limit; retriable with the given hint.
    #[error("provider rate limited")]
    RateLimited {
        /// Retry-After hint when supplied.
        retry_after: Option<Duration>,
    },
    /// No adapter registered under the requested name.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// HTTP helpers shared by all adapters
// ---------------------------------------------------------------------------

/// Per-call timeout applied to every provider request.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Check HTTP response status and return the body text or a structured
/// error. 429 maps to [`ProviderError::RateLimited`] carrying the
/// Retry-After hint so the runner can back off accordingly.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure,
/// `ProviderError::RateLimited` on 429, `ProviderError::HttpStatus` on
/// any other non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"Bearer [A-Za-z0-9._\-]{16,}",
        r"api[_-]?key=[A-Za-z0-9_\-]{12,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// LLM trait
// ---------------------------------------------------------------------------

/// Core LLM port. Implementations must be `Send + Sync` for use across
/// handler task boundaries.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Request a chat completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Whether the adapter is usable with its current configuration
    /// (cheap probe; no generation).
    async fn validate(&self) -> bool;

    /// The model identifier this adapter is instantiated for.
    fn model_id(&self) -> &str;
}

impl std::fmt::Debug for dyn LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn LlmClient")
            .field("model_id", &self.model_id())
            .finish()
    }
}
