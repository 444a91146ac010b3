//! Name-keyed provider registry.
//!
//! Adapters are constructed once from configuration; tenants select them
//! at handler entry by the names stored on their row. Tests register mock
//! implementations through the same surface.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::types::Tenant;

use super::anthropic::AnthropicClient;
use super::email::{EmailSender, InstantlyClient};
use super::enrich::{ApolloClient, EnrichmentFetcher, HttpEnrichmentClient, ProspectSearch};
use super::linkedin::{HeyReachClient, LinkedInAutomation};
use super::notify::{NoopNotifier, Notifier, WebhookNotifier};
use super::openai::OpenAiClient;
use super::{LlmClient, ProviderError};

// ── Configuration ───────────────────────────────────────────────

/// One configured LLM adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
    /// Registry name tenants refer to.
    pub name: String,
    /// Adapter kind: "anthropic" or "openai".
    pub kind: String,
    /// Model identifier.
    pub model: String,
    /// API key.
    pub api_key: String,
}

/// One configured delivery adapter (email or LinkedIn).
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryProviderConfig {
    /// Registry name tenants refer to.
    pub name: String,
    /// Adapter kind: "instantly" or "heyreach".
    pub kind: String,
    /// API key.
    pub api_key: String,
    /// Endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Enrichment service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Service base URL.
    pub base_url: String,
    /// API key.
    pub api_key: String,
}

/// Prospect-search service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProspectConfig {
    /// API key.
    pub api_key: String,
    /// Endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// The provider-registry configuration root.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// LLM adapters.
    pub llm: Vec<LlmProviderConfig>,
    /// Email delivery adapters.
    pub email: Vec<DeliveryProviderConfig>,
    /// LinkedIn automation adapters.
    pub linkedin: Vec<DeliveryProviderConfig>,
    /// Enrichment service.
    pub enrichment: Option<EnrichmentConfig>,
    /// Prospect search service.
    pub prospect: Option<ProspectConfig>,
    /// Notification webhook URL.
    pub notify_webhook: Option<String>,
}

// ── Registry ────────────────────────────────────────────────────

/// Registered adapters, looked up by name at handler entry.
#[derive(Clone)]
pub struct ProviderRegistry {
    llm: HashMap<String, Arc<dyn LlmClient>>,
    email: HashMap<String, Arc<dyn EmailSender>>,
    linkedin: HashMap<String, Arc<dyn LinkedInAutomation>>,
    enrichment: Option<Arc<dyn EnrichmentFetcher>>,
    prospect: Option<Arc<dyn ProspectSearch>>,
    notifier: Arc<dyn Notifier>,
}

impl ProviderRegistry {
    /// An empty registry (tests register mocks into it).
    pub fn empty() -> Self {
        Self {
            llm: HashMap::new(),
            email: HashMap::new(),
            linkedin: HashMap::new(),
            enrichment: None,
            prospect: None,
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// Build every configured adapter.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::empty();

        for llm in &config.llm {
            let client: Arc<dyn LlmClient> = match llm.kind.as_str() {
                "openai" => Arc::new(OpenAiClient::new(&llm.model, &llm.api_key)),
                _ => Arc::new(AnthropicClient::new(&llm.model, &llm.api_key)),
            };
            registry.llm.insert(llm.name.clone(), client);
        }
        for email in &config.email {
            let mut client = InstantlyClient::new(&email.api_key);
            if let Some(base) = &email.base_url {
                client = client.with_base_url(base);
            }
            registry.email.insert(email.name.clone(), Arc::new(client));
        }
        for linkedin in &config.linkedin {
            let mut client = HeyReachClient::new(&linkedin.api_key);
            if let Some(base) = &linkedin.base_url {
                client = client.with_base_url(base);
            }
            registry
                .linkedin
                .insert(linkedin.name.clone(), Arc::new(client));
        }
        if let Some(enrichment) = &config.enrichment {
            registry.enrichment = Some(Arc::new(HttpEnrichmentClient::new(
                &enrichment.base_url,
                &enrichment.api_key,
            )));
        }
        if let Some(prospect) = &config.prospect {
            let mut client = ApolloClient::new(&prospect.api_key);
            if let Some(base) = &prospect.base_url {
                client = client.with_base_url(base);
            }
            registry.prospect = Some(Arc::new(client));
        }
        if let Some(url) = &config.notify_webhook {
            registry.notifier = Arc::new(WebhookNotifier::new(url));
        }

        info!(
            llm = registry.llm.len(),
            email = registry.email.len(),
            linkedin = registry.linkedin.len(),
            "provider registry built"
        );
        registry
    }

    /// Register an LLM adapter under a name.
    pub fn register_llm(&mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) {
        self.llm.insert(name.into(), client);
    }

    /// Register an email adapter under a name.
    pub fn register_email(&mut self, name: impl Into<String>, client: Arc<dyn EmailSender>) {
        self.email.insert(name.into(), client);
    }

    /// Register a LinkedIn adapter under a name.
    pub fn register_linkedin(
        &mut self,
        name: impl Into<String>,
        client: Arc<dyn LinkedInAutomation>,
    ) {
        self.linkedin.insert(name.into(), client);
    }

    /// Register the enrichment fetcher.
    pub fn register_enrichment(&mut self, client: Arc<dyn EnrichmentFetcher>) {
        self.enrichment = Some(client);
    }

    /// Register the prospect-search client.
    pub fn register_prospect(&mut self, client: Arc<dyn ProspectSearch>) {
        self.prospect = Some(client);
    }

    /// Replace the notifier.
    pub fn register_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifier = notifier;
    }

    /// The tenant's LLM adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when the named adapter is
    /// not registered.
    pub fn llm_for_tenant(&self, tenant: &Tenant) -> Result<Arc<dyn LlmClient>, ProviderError> {
        let name = tenant.llm_provider.as_deref().unwrap_or("anthropic");
        self.llm
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::Unavailable(format!("llm adapter {name:?}")))
    }

    /// The tenant's email delivery adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when the tenant has no
    /// configured adapter.
    pub fn email_for_tenant(&self, tenant: &Tenant) -> Result<Arc<dyn EmailSender>, ProviderError> {
        let name = tenant
            .active_email_provider
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("no email provider set".to_owned()))?;
        self.email
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::Unavailable(format!("email adapter {name:?}")))
    }

    /// The tenant's LinkedIn automation adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when the tenant has no
    /// configured adapter.
    pub fn linkedin_for_tenant(
        &self,
        tenant: &Tenant,
    ) -> Result<Arc<dyn LinkedInAutomation>, ProviderError> {
        let name = tenant
            .active_linkedin_provider
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("no linkedin provider set".to_owned()))?;
        self.linkedin
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::Unavailable(format!("linkedin adapter {name:?}")))
    }

    /// The enrichment fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when not configured.
    pub fn enrichment(&self) -> Result<Arc<dyn EnrichmentFetcher>, ProviderError> {
        self.enrichment
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("enrichment fetcher".to_owned()))
    }

    /// The prospect-search client.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when not configured.
    pub fn prospect(&self) -> Result<Arc<dyn ProspectSearch>, ProviderError> {
        self.prospect
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("prospect search".to_owned()))
    }

    /// The notifier (never absent; defaults to a no-op).
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }
}
