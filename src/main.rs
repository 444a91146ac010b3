//! The `cadence` worker binary.
//!
//! `start` runs the event dispatcher, cron scheduler, and timer sweeper
//! against the configured store; the other subcommands are one-shot
//! operations that enqueue work or prepare the database.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use cadence::config::CadenceConfig;
use cadence::ingest::{IngestHandler, IngestScanHandler, IngestSettings};
use cadence::learning::{DailySummaryHandler, LearningHandler, LearningScanHandler};
use cadence::logging::{self, LogMode};
use cadence::orchestrator::{DeployHandler, OrchestrationEventHandler};
use cadence::providers::ProviderRegistry;
use cadence::qualify::{QualificationHandler, QualifySettings};
use cadence::research::ResearchHandler;
use cadence::review::ReviewHandler;
use cadence::runner::{cron, names, Emitter, HandlerRegistry, Worker};
use cadence::sequence::{GenerationHandler, RevisionHandler};
use cadence::store::Store;

#[derive(Parser)]
#[command(name = "cadence", about = "Outbound sales automation worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker: dispatcher, cron scheduler, timer sweeper.
    Start,
    /// Apply the schema migrations and exit.
    Migrate,
    /// Enqueue a one-off ingestion for a campaign.
    Ingest {
        /// Campaign id.
        #[arg(long)]
        campaign: i64,
        /// Tenant id.
        #[arg(long)]
        tenant: i64,
    },
    /// Enqueue a learning run for a tenant.
    Learn {
        /// Tenant id.
        #[arg(long)]
        tenant: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Start => start().await,
        Command::Migrate => {
            let _logging = logging::init(&LogMode::Cli)?;
            let config = CadenceConfig::load()?;
            let store = Store::connect(&config.database.path).await?;
            store.migrate().await?;
            info!(path = %config.database.path, "migrations applied");
            Ok(())
        }
        Command::Ingest { campaign, tenant } => {
            let _logging = logging::init(&LogMode::Cli)?;
            let config = CadenceConfig::load()?;
            let store = Store::connect(&config.database.path).await?;
            store.migrate().await?;
            let emitter = Emitter::new(store.pool().clone());
            let id = emitter
                .emit(
                    names::CAMPAIGN_MANUAL_INGEST,
                    &json!({"campaign_id": campaign, "tenant_id": tenant}),
                )
                .await?;
            info!(event = %id, campaign, "manual ingestion enqueued");
            Ok(())
        }
        Command::Learn { tenant } => {
            let _logging = logging::init(&LogMode::Cli)?;
            let config = CadenceConfig::load()?;
            let store = Store::connect(&config.database.path).await?;
            store.migrate().await?;
            let emitter = Emitter::new(store.pool().clone());
            let id = emitter
                .emit(names::LEARNING_ANALYZE, &json!({"tenant_id": tenant}))
                .await?;
            info!(event = %id, tenant, "learning run enqueued");
            Ok(())
        }
    }
}

async fn start() -> Result<()> {
    let config = CadenceConfig::load()?;
    let _logging_guard = logging::init(&LogMode::Worker {
        logs_dir: config.logs_dir(),
    })
    .context("logging setup failed")?;
    info!("cadence starting");

    let store = Store::connect(&config.database.path).await?;
    store.migrate().await?;
    let providers = Arc::new(ProviderRegistry::from_config(&config.providers));
    let emitter = Emitter::new(store.pool().clone());

    let registry = Arc::new(build_registry(&config, &store, &providers, &emitter));
    let worker = Worker::new(store.clone(), Arc::clone(&registry), providers.notifier())
        .with_poll_interval(Duration::from_millis(config.worker.poll_interval_ms));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = tokio::spawn(cron::run_scheduler(
        store.clone(),
        emitter.clone(),
        config.cron_jobs(),
        Duration::from_secs(config.worker.scheduler_tick_secs),
        shutdown_rx.clone(),
    ));
    let dispatcher = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();

    dispatcher.await.ok();
    scheduler.await.ok();
    info!("cadence stopped");
    Ok(())
}

fn build_registry(
    config: &CadenceConfig,
    store: &Store,
    providers: &Arc<ProviderRegistry>,
    emitter: &Emitter,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register(Arc::new(IngestScanHandler::new(
        store.clone(),
        emitter.clone(),
    )));
    registry.register(Arc::new(IngestHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
        IngestSettings {
            min_intent_score: config.ingest.min_intent_score,
            auto_research_limit: config.ingest.auto_research_limit,
            ..IngestSettings::default()
        },
    )));
    registry.register(Arc::new(QualificationHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
        QualifySettings {
            auto_approve_review: config.qualification.auto_approve_review,
            ..QualifySettings::default()
        },
    )));
    registry.register(Arc::new(ResearchHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
    )));
    registry.register(Arc::new(GenerationHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
    )));
    registry.register(Arc::new(RevisionHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
    )));
    registry.register(Arc::new(ReviewHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
    )));
    registry.register(Arc::new(DeployHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
    )));
    registry.register(Arc::new(OrchestrationEventHandler::new(
        store.clone(),
        Arc::clone(providers),
        emitter.clone(),
    )));
    registry.register(Arc::new(LearningScanHandler::new(
        store.clone(),
        emitter.clone(),
    )));
    registry.register(Arc::new(LearningHandler::new(
        store.clone(),
        Arc::clone(providers),
    )));
    registry.register(Arc::new(DailySummaryHandler::new(
        store.clone(),
        Arc::clone(providers),
    )));

    registry
}
