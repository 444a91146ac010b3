//! OpenAI chat-completions adapter.

use serde_json::{json, Value};

use super::{
    check_http_response, ChatRequest, ChatResponse, ChatRole, FinishReason, LlmClient,
    ProviderError, TokenUsage, PROVIDER_TIMEOUT,
};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI `/v1/chat/completions` client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create an adapter for `model` with the given key.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_owned(),
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
    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &request.messages {
        messages.push(json!({
            "role": openai_role(message.role),
            "content": message.content,
        }));
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    // No extended-thinking support; the budget is ignored here.
    body
}

/// Parse the wire-format response body. Pure, for testability.
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] when the payload shape is unexpected.
pub fn parse_response(parsed: &Value) -> Result<ChatResponse, ProviderError> {
    let choice = parsed
        .pointer("/choices/0")
        .ok_or_else(|| ProviderError::Parse("missing choices".to_owned()))?;
    let content = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Parse("missing message content".to_owned()))?
        .to_owned();

    let finish = match choice.get("finish_reason").and_then(Value::as_str) {
        Some("stop") | None => FinishReason::EndTurn,
        Some("length") => FinishReason::MaxTokens,
        Some(other) => FinishReason::Other(other.to_owned()),
    };

    let usage = TokenUsage {
        input_tokens: read_u32(parsed, "/usage/prompt_tokens"),
        output_tokens: read_u32(parsed, "/usage/completion_tokens"),
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

fn openai_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request(&self.model, &request);
        let response = self
            .client
            .post(&self.base_url)
            .timeout(PROVIDER_TIMEOUT)
            .bearer_auth(&self.api_key)
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
