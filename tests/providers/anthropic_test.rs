//! Anthropic wire format tests.

use serde_json::json;

use cadence::providers::anthropic::{build_request, parse_response};
use cadence::providers::{ChatMessage, ChatRequest, FinishReason};

fn simple_request() -> ChatRequest {
    ChatRequest {
        system: Some("You are helpful.".to_owned()),
        messages: vec![ChatMessage::user("Hello")],
        max_tokens: Some(1024),
        temperature: None,
        thinking_budget: None,
    }
}

#[test]
fn build_request_sets_model_and_system() {
    let body = build_request("claude-sonnet", &simple_request());
    assert_eq!(body["model"], "claude-sonnet");
    assert_eq!(body["system"], "You are helpful.");
    assert_eq!(body["max_tokens"], 1024);
}

#[test]
fn build_request_defaults_max_tokens() {
    let mut request = simple_request();
    request.max_tokens = None;
    let body = build_request("m", &request);
    assert_eq!(body["max_tokens"], 1024);
}

#[test]
fn thinking_budget_enables_extended_thinking() {
    let mut request = simple_request();
    request.thinking_budget = Some(8000);
    let body = build_request("m", &request);
    assert_eq!(body["thinking"]["type"], "enabled");
    assert_eq!(body["thinking"]["budget_tokens"], 8000);
}

#[test]
fn parse_response_joins_text_blocks() {
    let payload = json!({
        "content": [
            {"type": "text", "text": "Hello "},
            {"type": "thinking", "thinking": "..."},
            {"type": "text", "text": "world"}
        ],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 10, "output_tokens": 5}
    });
    let response = parse_response(&payload).expect("parse");
    assert_eq!(response.content, "Hello world");
    assert_eq!(response.finish, FinishReason::EndTurn);
    assert_eq!(response.usage.input_tokens, 10);
    assert_eq!(response.usage.output_tokens, 5);
}

#[test]
fn parse_response_maps_max_tokens_stop() {
    let payload = json!({
        "content": [{"type": "text", "text": "truncated"}],
        "stop_reason": "max_tokens",
    });
    let response = parse_response(&payload).expect("parse");
    assert_eq!(response.finish, FinishReason::MaxTokens);
}

#[test]
fn parse_response_rejects_missing_content() {
    assert!(parse_response(&json!({"stop_reason": "end_turn"})).is_err());
}
