//! Enrichment and prospect-search ports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::{check_http_response, ProviderError, PROVIDER_TIMEOUT};

/// Fetches an external page (LinkedIn profile, company page, web search)
/// as an opaque blob for the research waterfall.
#[async_trait]
pub trait EnrichmentFetcher: Send + Sync {
    /// Fetch a page; the result is stored opaquely.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn fetch_page(&self, url: &str) -> Result<Value, ProviderError>;
}

/// Prospect-database search parameters, either loaded from a saved search
/// or synthesized from the brand ICP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProspectQuery {
    /// Job titles to match.
    #[serde(default)]
    pub titles: Vec<String>,
    /// Industries to match.
    #[serde(default)]
    pub industries: Vec<String>,
    /// Employee-count bands ("11-50", "51-200", ...).
    #[serde(default)]
    pub employee_ranges: Vec<String>,
    /// Result cap.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

/// Prospect-database search port.
#[async_trait]
pub trait ProspectSearch: Send + Sync {
    /// Search people matching the query; returns raw records.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API or network failure.
    async fn search_people(&self, query: &ProspectQuery) -> Result<Vec<Value>, ProviderError>;
}

/// Generic HTTP enrichment client (scraping proxy style: the service
/// fetches and pre-digests the target URL).
#[derive(Debug, Clone)]
pub struct HttpEnrichmentClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpEnrichmentClient {
    /// Create a client against the given enrichment service.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EnrichmentFetcher for HttpEnrichmentClient {
    async fn fetch_page(&self, target: &str) -> Result<Value, ProviderError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Parse(format!("bad enrichment base url: {e}")))?;
        url.query_pairs_mut().append_pair("url", target);
        let response = self
            .client
            .get(url)
            .timeout(PROVIDER_TIMEOUT)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

/// Apollo people-search adapter.
#[derive(Debug, Clone)]
pub struct ApolloClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl ApolloClient {
    /// Create an adapter with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.apollo.io/v1".to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint (tests point at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ProspectSearch for ApolloClient {
    async fn search_people(&self, query: &ProspectQuery) -> Result<Vec<Value>, ProviderError> {
        let base = if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        };
        let url = Url::parse(&base)
            .and_then(|base| base.join("mixed_people/search"))
            .map_err(|e| ProviderError::Parse(format!("bad apollo url: {e}")))?;
        let body = json!({
            "person_titles": query.titles,
            "organization_industries": query.industries,
            "organization_num_employees_ranges": query.employee_ranges,
            "per_page": query.limit,
        });
        let response = self
            .client
            .post(url)
            .timeout(PROVIDER_TIMEOUT)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed
            .get("people")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}
