//! OpenAI wire format tests.

use serde_json::json;

use cadence::providers::openai::{build_request, parse_response};
use cadence::providers::{ChatMessage, ChatRequest, FinishReason};

#[test]
fn system_prompt_leads_the_message_list() {
    let request = ChatRequest {
        system: Some("Be terse.".to_owned()),
        messages: vec![ChatMessage::user("hi")],
        max_tokens: Some(100),
        temperature: Some(0.5),
        thinking_budget: None,
    };
    let body = build_request("gpt-x", &request);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["temperature"], 0.5);
}

#[test]
fn parse_response_reads_first_choice() {
    let payload = json!({
        "choices": [{"message": {"content": "answer"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 7, "completion_tokens": 3}
    });
    let response = parse_response(&payload).expect("parse");
    assert_eq!(response.content, "answer");
    assert_eq!(response.finish, FinishReason::EndTurn);
    assert_eq!(response.usage.input_tokens, 7);
}

#[test]
fn length_finish_maps_to_max_tokens() {
    let payload = json!({
        "choices": [{"message": {"content": "x"}, "finish_reason": "length"}],
    });
    let response = parse_response(&payload).expect("parse");
    assert_eq!(response.finish, FinishReason::MaxTokens);
}

#[test]
fn missing_choices_is_a_parse_error() {
    assert!(parse_response(&json!({"usage": {}})).is_err());
}
