//! Verification service
//!
//! Hosts the verification job scheduler, the time-series and analysis
//! endpoints the learning engine reads from, and metadata projection.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use verifier_lib::{
    collaborators::{
        HttpLearningEngineClient, HttpManagerClient, InMemoryAnalysisStore, InMemoryMetricStore,
    },
    cursor::InMemoryCursorStore,
    health::{components, HealthRegistry},
    job::{Collaborators, JobSettings},
    metadata::MetadataGraphBuilder,
    observability::StructuredLogger,
    JobTable, VerificationScheduler,
};

mod api;
mod config;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::VerifierConfig::load()?;
    info!(
        service_name = %config.service_name,
        manager_url = %config.manager_url,
        learning_engine_url = %config.learning_engine_url,
        "Verifier configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::LEARNING_ENGINE).await;
    health_registry.register(components::MANAGER).await;

    let logger = StructuredLogger::new(config.service_name.clone());
    logger.log_startup(SERVICE_VERSION);

    let metric_store = Arc::new(InMemoryMetricStore::new());
    let analysis_store = Arc::new(InMemoryAnalysisStore::new());
    let manager = Arc::new(HttpManagerClient::new(
        &config.manager_url,
        config.request_timeout(),
    )?);
    let learning_engine = Arc::new(HttpLearningEngineClient::new(
        &config.learning_engine_url,
        config.request_timeout(),
    )?);
    let table = Arc::new(JobTable::with_finished_retention(
        config.finished_job_retention,
    ));

    let collaborators = Collaborators::builder()
        .oracle(manager.clone())
        .notifier(manager)
        .learning_engine(learning_engine)
        .metric_store(metric_store.clone())
        .analysis_store(analysis_store.clone())
        .registry(table.clone())
        .cursors(Arc::new(InMemoryCursorStore::new()))
        .build()?;

    let settings = JobSettings::new(config.service_name.clone(), &config.service_base_url)?
        .with_thresholds(config.analysis.thresholds())
        .with_failure_risk_threshold(config.analysis.failure_risk_threshold);

    let scheduler = Arc::new(
        VerificationScheduler::new(table, collaborators, settings, health_registry.clone())
            .with_tick_interval(config.tick_interval()),
    );

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        scheduler: scheduler.clone(),
        metric_store,
        analysis_store,
        builder: MetadataGraphBuilder::new(),
        defaults: api::RegistrationDefaults {
            tolerance: config.analysis.tolerance,
            smooth_window: config.analysis.smooth_window,
        },
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task panicked");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
