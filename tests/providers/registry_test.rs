//! Provider registry resolution.

use std::sync::Arc;

use cadence::providers::anthropic::AnthropicClient;
use cadence::providers::registry::{LlmProviderConfig, ProvidersConfig};
use cadence::providers::{ProviderError, ProviderRegistry};
use cadence::types::Tenant;

fn tenant() -> Tenant {
    Tenant {
        id: 1,
        name: "t".to_owned(),
        active_email_provider: Some("instantly".to_owned()),
        active_linkedin_provider: None,
        enabled_channels: vec!["email".to_owned()],
        enabled_data_sources: vec![],
        icp: None,
        targeting: None,
        llm_provider: Some("anthropic".to_owned()),
        llm_model: None,
        notify_channel: None,
    }
}

#[test]
fn configured_adapters_resolve_by_name() {
    let config = ProvidersConfig {
        llm: vec![LlmProviderConfig {
            name: "anthropic".to_owned(),
            kind: "anthropic".to_owned(),
            model: "claude-sonnet".to_owned(),
            api_key: "key".to_owned(),
        }],
        ..ProvidersConfig::default()
    };
    let registry = ProviderRegistry::from_config(&config);
    let llm = registry.llm_for_tenant(&tenant()).expect("llm resolves");
    assert_eq!(llm.model_id(), "claude-sonnet");
}

#[test]
fn missing_adapters_are_unavailable_not_panics() {
    let registry = ProviderRegistry::empty();
    let err = registry.llm_for_tenant(&tenant()).expect_err("no llm");
    assert!(matches!(err, ProviderError::Unavailable(_)));

    let err = registry.email_for_tenant(&tenant()).expect_err("no email");
    assert!(matches!(err, ProviderError::Unavailable(_)));
}

#[test]
fn tenant_without_linkedin_provider_is_unavailable() {
    let registry = ProviderRegistry::empty();
    let err = registry
        .linkedin_for_tenant(&tenant())
        .expect_err("unset provider");
    assert!(matches!(err, ProviderError::Unavailable(_)));
}

#[test]
fn manually_registered_adapters_win() {
    let mut registry = ProviderRegistry::empty();
    registry.register_llm(
        "anthropic",
        Arc::new(AnthropicClient::new("claude-test", "k")),
    );
    let llm = registry.llm_for_tenant(&tenant()).expect("resolves");
    assert_eq!(llm.model_id(), "claude-test");
}

#[test]
fn notifier_defaults_to_noop() {
    let registry = ProviderRegistry::empty();
    // Sending through the default notifier must not error.
    let notifier = registry.notifier();
    let result = futures_block(notifier.send("ops", &serde_json::json!({})));
    assert!(result.is_ok());
}

fn futures_block<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(fut)
}
