//! Anthropic messages API adapter.

use serde_json::{json, Value};

use super::{
    check_http_response, ChatRequest, ChatResponse, ChatRole, FinishReason, LlmClient,
    ProviderError, TokenUsage, PROVIDER_TIMEOUT,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic `/v1/messages` client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create an adapter for `model` with the given key.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint (tests point at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Build the wire-format request body. Pure, for testability.
pub fn build_request(model: &str, request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": anthropic_role(message.role),
                "content": message.content,
            })
        })
        .collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(1024),
    });

    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(budget) = request.thinking_budget {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
    }
    body
}

/// Parse the wire-format response body. Pure, for testability.
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] when the payload shape is unexpected.
pub fn parse_response(parsed: &Value) -> Result<ChatResponse, ProviderError> {
    let content = parsed
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .ok_or_else(|| ProviderError::Parse("missing content array".to_owned()))?;

    let finish = match parsed.get("stop_reason").and_then(Value::as_str) {
        Some("end_turn") | None => FinishReason::EndTurn,
        Some("max_tokens") => FinishReason::MaxTokens,
        Some(other) => FinishReason::Other(other.to_owned()),
    };

    let usage = TokenUsage {
        input_tokens: read_u32(parsed, "/usage/input_tokens"),
        output_tokens: read_u32(parsed, "/usage/output_tokens"),
    };

    Ok(ChatResponse {
        content,
        usage,
        finish,
    })
}

fn read_u32(value: &Value, pointer: &str) -> u32 {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

fn anthropic_role(role: ChatRole) -> &'static str {
    match role {
        // System content travels in the top-level `system` field; a
        // stray system message degrades to user.
        ChatRole::System | ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request(&self.model, &request);
        let response = self
            .client
            .post(&self.base_url)
            .timeout(PROVIDER_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;
        parse_response(&parsed)
    }

    async fn validate(&self) -> bool {
        !self.api_key.is_empty() && !self.model.is_empty()
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
