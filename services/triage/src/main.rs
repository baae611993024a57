use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use triage_service::config::BlobBackend;
use triage_service::{
    provider_from_config, start_api_server, AppState, BatchOrchestrator, BlobStore, CatalogStore,
    Config, MemoryBlobStore, MemoryCatalog, OrchestratorSettings, PostgresCatalog, S3BlobStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Lightbox Triage Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let catalog = build_catalog(&config).await?;
    let blobs = build_blob_store(&config).await?;

    let provider = provider_from_config(&config.enhancement)
        .context("Failed to initialize enhancement provider")?;
    if let Err(e) = provider.check_credentials() {
        // Culling still works; enhancement requests will be refused
        warn!(provider = provider.name(), error = %e, "Enhancement provider is not usable");
    }

    let orchestrator = BatchOrchestrator::new(
        catalog,
        blobs,
        provider,
        OrchestratorSettings::from_config(&config),
    )
    .context("Failed to initialize batch orchestrator")?;

    let api_state = AppState {
        orchestrator: Arc::new(orchestrator),
    };

    let shutdown = CancellationToken::new();

    // Spawn API server task
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Triage service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down triage service");

    shutdown.cancel();
    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task panicked");
    }

    info!("Triage service stopped");

    Ok(())
}

async fn build_catalog(config: &Config) -> Result<Arc<dyn CatalogStore>> {
    let Some(database) = &config.database else {
        warn!("No database configured; using the in-memory catalog");
        return Ok(Arc::new(MemoryCatalog::new()));
    };

    let catalog = PostgresCatalog::new(database)
        .await
        .context("Failed to initialize photo catalog")?;

    // Run migrations if enabled
    if database.run_migrations {
        catalog
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    Ok(Arc::new(catalog))
}

async fn build_blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.blob_store.backend {
        BlobBackend::S3 => Arc::new(
            S3BlobStore::new(&config.blob_store)
                .await
                .context("Failed to initialize S3 blob store")?,
        ),
        BlobBackend::Memory => {
            warn!("Using the in-memory blob store; blobs are lost on restart");
            Arc::new(MemoryBlobStore::new(config.blob_store.memory_base_url.clone()))
        }
    };
    Ok(store)
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
