//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipper_api::{
    create_router, metrics, ApiConfig, ApiError, ApiResult, AppState, Backends, StatusRelayWorker,
};
use clipper_queue::{QueueConfig, QueueName};

/// Consumer group shared by API replicas on the status queue.
const API_CONSUMER_GROUP: &str = "clipper:api";

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipper=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting clipper-api");

    if let Err(e) = run().await {
        error!("API error: {}", e);
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

async fn run() -> ApiResult<()> {
    let config = ApiConfig::from_env()?;
    info!("API config: host={}, port={}", config.host, config.port);

    // Initialize metrics
    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let mut queue_config = QueueConfig::from_env()?;
    if std::env::var("QUEUE_CONSUMER_GROUP").is_err() {
        queue_config.consumer_group = API_CONSUMER_GROUP.to_string();
    }
    let relay_options = queue_config.consumer_options(QueueName::StatusUpdate);

    let backends = Backends::from_env(queue_config).await?;
    let state = AppState::new(config.clone(), backends);

    // Status updates from workers feed the live event streams
    let (stop_relay, relay_shutdown) = watch::channel(false);
    let relay = StatusRelayWorker::new(
        Arc::clone(&state.broker),
        Arc::clone(&state.notifier),
        relay_options,
    );
    let relay_task = tokio::spawn(async move { relay.run(relay_shutdown).await });

    let notifier = Arc::clone(&state.notifier);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ApiError::config_error(format!("Invalid bind address: {}", e)))?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Event streams never end on their own
            notifier.close_all();
        })
        .await;

    stop_relay.send_replace(true);
    match relay_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Status relay stopped with error: {}", e),
        Err(e) => error!("Status relay task failed: {}", e),
    }

    served.map_err(|e| ApiError::internal(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
