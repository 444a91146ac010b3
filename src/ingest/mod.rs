//! Ingestion workflows: per-campaign lead pulls.
//!
//! A daily cron (per source kind) fans out one ingestion event per active
//! campaign; the UI/CLI can request a single campaign on demand. Each run
//! asserts the campaign is active, pulls from the configured source,
//! filters and scores, and emits one lead event per qualified record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::normalize;
use crate::providers::{check_http_response, ProspectQuery, ProviderRegistry, PROVIDER_TIMEOUT};
use crate::runner::{names, Emitter, EventHandler, RetryPolicy, StageError, StepContext};
use crate::scoring;
use crate::store::Store;
use crate::types::{Campaign, DataSourceKind, IcpProfile, LeadSource};

/// Tunables for ingestion.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Minimum intent score kept from intent feeds.
    pub min_intent_score: u32,
    /// Rank cut-off for the auto-research flag.
    pub auto_research_limit: usize,
    /// Cap on intent records taken per run.
    pub intent_top_n: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            min_intent_score: 60,
            auto_research_limit: 20,
            intent_top_n: 100,
        }
    }
}

/// Fans the daily cron out into one ingestion event per active campaign
/// pulling from the scanned source kind.
pub struct IngestScanHandler {
    store: Store,
    emitter: Emitter,
}

impl IngestScanHandler {
    /// Build the handler.
    pub fn new(store: Store, emitter: Emitter) -> Self {
        Self { store, emitter }
    }
}

#[async_trait]
impl EventHandler for IngestScanHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::CAMPAIGN_INGEST_SCAN]
    }

    async fn handle(&self, _ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let kind_raw = payload
            .get("source_kind")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::fatal("ingest scan without source_kind"))?;
        let kind = DataSourceKind::parse(kind_raw)
            .map_err(|e| StageError::fatal(e.to_string()))?;

        let campaigns = self.store.list_active_campaigns_by_source(kind).await?;
        info!(source = kind.as_str(), campaigns = campaigns.len(), "ingest scan");
        for campaign in campaigns {
            self.emitter
                .emit(names::CAMPAIGN_INGEST, &ingest_payload(&campaign))
                .await
                .map_err(|e| StageError::transient(e.to_string()))?;
        }
        Ok(())
    }
}

fn ingest_payload(campaign: &Campaign) -> Value {
    json!({
        "campaign_id": campaign.id,
        "tenant_id": campaign.tenant_id,
        "brand_id": campaign.brand_id,
        "data_source_type": campaign.data_source_kind.as_str(),
        "data_source_config": campaign.data_source_config.clone(),
        "campaign_name": campaign.name,
    })
}

/// Ingests one campaign: validates, pulls, filters, scores, and emits
/// lead events.
pub struct IngestHandler {
    store: Store,
    providers: Arc<ProviderRegistry>,
    emitter: Emitter,
    settings: IngestSettings,
    http: reqwest::Client,
}

impl IngestHandler {
    /// Build the handler.
    pub fn new(
        store: Store,
        providers: Arc<ProviderRegistry>,
        emitter: Emitter,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            providers,
            emitter,
            settings,
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_feed(&self, config: &Value) -> Result<Vec<Value>, StageError> {
        // Inline records (CSV uploads land here) skip the pull entirely.
        if let Some(records) = config.get("records").and_then(Value::as_array) {
            return Ok(records.clone());
        }
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::fatal("data source config has no url"))?;
        let mut request = self.http.get(url).timeout(PROVIDER_TIMEOUT);
        if let Some(key) = config.get("api_key").and_then(Value::as_str) {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StageError::transient(format!("feed fetch: {e}")))?;
        let body = check_http_response(response).await.map_err(StageError::from)?;
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| StageError::fatal(format!("feed payload: {e}")))?;
        Ok(parsed
            .get("records")
            .or_else(|| parsed.get("leads"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_else(|| parsed.as_array().cloned().unwrap_or_default()))
    }

    /// Records with an email, first name, and last name survive.
    fn filter_complete(records: Vec<Value>) -> Vec<Value> {
        records
            .into_iter()
            .filter(|record| {
                ["email", "first_name", "last_name"].iter().all(|field| {
                    record
                        .get(field)
                        .and_then(Value::as_str)
                        .is_some_and(|v| !v.trim().is_empty())
                })
            })
            .collect()
    }

    async fn ingest_pull(
        &self,
        ctx: &StepContext,
        campaign: &Campaign,
        source: LeadSource,
    ) -> Result<usize, StageError> {
        let config = campaign.data_source_config.clone();
        let records = ctx
            .run("fetch-records", async {
                let records = self.fetch_feed(&config).await?;
                Ok(Self::filter_complete(records))
            })
            .await?;

        if source == LeadSource::Intent {
            return self.ingest_intent(ctx, campaign, records).await;
        }

        let payloads: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "tenant_id": campaign.tenant_id,
                    "campaign_id": campaign.id,
                    "source": source.as_str(),
                    "record": record,
                })
            })
            .collect();
        let emitted = ctx
            .run("emit-events", async {
                let ids = self
                    .emitter
                    .emit_batch(names::LEAD_INGESTED, &payloads)
                    .await
                    .map_err(|e| StageError::transient(e.to_string()))?;
                Ok(ids.len())
            })
            .await?;
        Ok(emitted)
    }

    async fn ingest_intent(
        &self,
        ctx: &StepContext,
        campaign: &Campaign,
        records: Vec<Value>,
    ) -> Result<usize, StageError> {
        let tenant = self.store.get_tenant(campaign.tenant_id).await?;
        let min_score = campaign
            .data_source_config
            .get("min_intent_score")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.settings.min_intent_score);

        let mut scored: Vec<(Value, scoring::IntentScore)> = records
            .into_iter()
            .map(|record| {
                let lead = normalize::normalize(&record, LeadSource::Intent);
                let score = scoring::intent_score(&lead, tenant.targeting.as_ref());
                (record, score)
            })
            .filter(|(_, score)| score.total >= min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total.cmp(&a.1.total));
        scored.truncate(self.settings.intent_top_n);

        let payloads: Vec<Value> = scored
            .iter()
            .enumerate()
            .map(|(rank, (record, score))| {
                json!({
                    "tenant_id": campaign.tenant_id,
                    "campaign_id": campaign.id,
                    "source": LeadSource::Intent.as_str(),
                    "record": record,
                    "intent": {
                        "score": score.total,
                        "tier": score.tier.as_str(),
                        "breakdown": score.breakdown,
                        "rank": rank,
                        "auto_research": rank < self.settings.auto_research_limit,
                    },
                })
            })
            .collect();

        let emitted = ctx
            .run("emit-events", async {
                let ids = self
                    .emitter
                    .emit_batch(names::LEAD_INTENT_INGESTED, &payloads)
                    .await
                    .map_err(|e| StageError::transient(e.to_string()))?;
                Ok(ids.len())
            })
            .await?;
        Ok(emitted)
    }

    async fn ingest_apollo(
        &self,
        ctx: &StepContext,
        campaign: &Campaign,
        icp: Option<&IcpProfile>,
    ) -> Result<usize, StageError> {
        let query = match campaign
            .data_source_config
            .get("saved_search_id")
            .and_then(Value::as_i64)
        {
            Some(search_id) => {
                let params = self
                    .store
                    .get_saved_search(campaign.tenant_id, search_id)
                    .await?;
                serde_json::from_value(params)
                    .map_err(|e| StageError::fatal(format!("saved search params: {e}")))?
            }
            None => {
                let icp = icp.ok_or_else(|| {
                    StageError::fatal("apollo ingestion needs a saved search or an ICP")
                })?;
                query_from_icp(icp)
            }
        };

        let prospect = self.providers.prospect().map_err(StageError::from)?;
        let records = ctx
            .run("fetch-records", async {
                let people = prospect.search_people(&query).await.map_err(StageError::from)?;
                Ok(people
                    .into_iter()
                    .filter(|p| p.get("email").and_then(Value::as_str).is_some())
                    .collect::<Vec<_>>())
            })
            .await?;

        let payloads: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "tenant_id": campaign.tenant_id,
                    "campaign_id": campaign.id,
                    "source": LeadSource::Apollo.as_str(),
                    "record": record,
                })
            })
            .collect();
        let emitted = ctx
            .run("emit-events", async {
                let ids = self
                    .emitter
                    .emit_batch(names::LEAD_INGESTED, &payloads)
                    .await
                    .map_err(|e| StageError::transient(e.to_string()))?;
                Ok(ids.len())
            })
            .await?;
        Ok(emitted)
    }
}

/// Synthesize prospect-search parameters from the brand ICP: titles from
/// personas, industries and employee bands from high-priority criteria.
pub fn query_from_icp(icp: &IcpProfile) -> ProspectQuery {
    let titles = icp
        .personas
        .iter()
        .flat_map(|p| p.titles.iter().cloned())
        .collect();
    let industries = icp
        .account_criteria
        .iter()
        .filter(|c| c.field == "industry" && c.priority == "high")
        .flat_map(|c| c.values.iter().cloned())
        .collect();
    let employee_ranges = icp
        .account_criteria
        .iter()
        .filter(|c| c.field == "employee_count" && c.priority == "high")
        .flat_map(|c| c.values.iter().cloned())
        .collect();
    ProspectQuery {
        titles,
        industries,
        employee_ranges,
        limit: 100,
    }
}

#[async_trait]
impl EventHandler for IngestHandler {
    fn event_names(&self) -> &'static [&'static str] {
        &[names::CAMPAIGN_INGEST, names::CAMPAIGN_MANUAL_INGEST]
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// At most 3 campaigns ingest concurrently.
    fn concurrency(&self) -> usize {
        3
    }

    async fn handle(&self, ctx: &StepContext, payload: Value) -> Result<(), StageError> {
        let campaign_id = payload
            .get("campaign_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("ingest event without campaign_id"))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StageError::fatal("ingest event without tenant_id"))?;

        // Campaign status is an ingestion barrier, re-checked at entry.
        let campaign = ctx
            .run("assert-campaign-active", async {
                let campaign = self.store.get_campaign(tenant_id, campaign_id).await?;
                if !campaign.is_active() {
                    return Err(StageError::fatal(format!(
                        "campaign {campaign_id} is {}",
                        campaign.status.as_str()
                    )));
                }
                Ok(campaign)
            })
            .await?;

        let icp = ctx
            .run("fetch-icp", async {
                let brand = self
                    .store
                    .get_brand(campaign.tenant_id, campaign.brand_id)
                    .await?;
                let tenant = self.store.get_tenant(campaign.tenant_id).await?;
                let icp = brand.effective_icp(&tenant).cloned();
                if icp.is_none() {
                    warn!(campaign = campaign.id, "no ICP configured; continuing");
                }
                Ok(icp)
            })
            .await?;

        let ingested = match campaign.data_source_kind {
            DataSourceKind::Pixel => self.ingest_pull(ctx, &campaign, LeadSource::Pixel).await,
            DataSourceKind::Intent => self.ingest_pull(ctx, &campaign, LeadSource::Intent).await,
            DataSourceKind::Apollo => self.ingest_apollo(ctx, &campaign, icp.as_ref()).await,
            DataSourceKind::Manual => {
                debug!(campaign = campaign.id, "manual source; nothing to pull");
                Ok(0)
            }
        };

        match ingested {
            Ok(count) => {
                info!(campaign = campaign.id, leads = count, "ingestion complete");
                self.store
                    .set_last_ingested(campaign.tenant_id, campaign.id, Utc::now(), None)
                    .await?;
                Ok(())
            }
            Err(err) => {
                // Campaign stays active; the error surfaces on next read.
                self.store
                    .set_last_ingested(campaign.tenant_id, campaign.id, Utc::now(), Some(err.reason()))
                    .await?;
                Err(err)
            }
        }
    }
}
