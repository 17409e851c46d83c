use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use outfit_diagnosis::app_state::AppState;
use outfit_diagnosis::config::AppConfig;
use outfit_diagnosis::routes::{self, CALLBACK_PATH, SLOT_CALLBACK_PATH};
use outfit_diagnosis::services::{
    dispatcher::FluxClient,
    initiator::{CorrelationMode, JobInitiator},
    result_store::{spawn_sweeper, InMemoryResultStore, ResultStore},
    storage::{ImageStorage, S3ImageStorage},
};

const BODY_LIMIT: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing outfit-diagnosis server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "diagnosis_jobs_dispatched_total",
        "Diagnosis jobs accepted by the processor"
    );
    metrics::describe_counter!(
        "diagnosis_dispatch_failures_total",
        "Diagnosis jobs the processor failed to accept"
    );
    metrics::describe_counter!("diagnosis_callbacks_total", "Results stored from callbacks");
    metrics::describe_counter!(
        "diagnosis_callbacks_rejected_total",
        "Callbacks rejected as malformed or unauthenticated"
    );
    metrics::describe_counter!(
        "diagnosis_results_served_total",
        "Result lookups answered with a result"
    );
    metrics::describe_counter!(
        "diagnosis_results_evicted_total",
        "Entries dropped by the retention sweep"
    );
    metrics::describe_gauge!("diagnosis_store_entries", "Live entries in the result store");

    let store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new(config.result_ttl()));

    tracing::info!(endpoint = %config.flux_webhook_url, "Initializing diagnosis processor client");
    let keyed_client = FluxClient::new(
        &config.flux_webhook_url,
        config.flux_api_key.as_deref(),
        config.flux_token.as_deref(),
        config.dispatch_timeout(),
    )
    .expect("Failed to initialize diagnosis processor client");
    let slot_client = FluxClient::new(
        config.slot_webhook_url(),
        config.flux_api_key.as_deref(),
        config.flux_token.as_deref(),
        config.dispatch_timeout(),
    )
    .expect("Failed to initialize single-slot processor client");

    let initiator = JobInitiator::new(
        Arc::new(keyed_client),
        store.clone(),
        config.callback_address(CALLBACK_PATH),
        CorrelationMode::Keyed,
        config.dispatch_timeout(),
    );
    let slot_initiator = JobInitiator::new(
        Arc::new(slot_client),
        store.clone(),
        config.callback_address(SLOT_CALLBACK_PATH),
        CorrelationMode::SingleSlot,
        config.dispatch_timeout(),
    );

    let storage: Option<Arc<dyn ImageStorage>> =
        match (&config.s3_bucket, &config.s3_access_key, &config.s3_secret_key) {
            (Some(bucket), Some(access_key), Some(secret_key)) => {
                tracing::info!(bucket = %bucket, "Initializing image storage");
                let storage = S3ImageStorage::new(
                    bucket,
                    &config.s3_region,
                    config.s3_endpoint.as_deref(),
                    access_key,
                    secret_key,
                )
                .expect("Failed to initialize image storage");
                Some(Arc::new(storage) as Arc<dyn ImageStorage>)
            }
            _ => {
                tracing::warn!("S3 bucket or credentials missing, uploads disabled");
                None
            }
        };

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set, callbacks are accepted without authentication");
    }

    let state = AppState::new(
        store.clone(),
        initiator,
        slot_initiator,
        storage,
        config.webhook_secret.clone(),
        config.long_poll_max(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(store, config.sweep_interval(), shutdown.clone());

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::render_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Result sweeper panicked");
    }
}
