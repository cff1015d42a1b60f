//! Siren API server binary entrypoint.
//!
//! Hosts the webhook notifier in-process. Shutdown order: stop accepting
//! requests, drain the notifier, then drop the Redis connections.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use siren_common::config::AppConfig;
use siren_common::redis_pool::create_redis_pool;
use siren_notifier::{Notifier, NotifierConfig, RedisTaskStore};

use siren_api::routes::create_router;
use siren_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("siren_api=info,siren_notifier=info,tower_http=info")
        }))
        .json()
        .init();

    tracing::info!("Starting Siren API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create Redis connection
    let (client, redis) = create_redis_pool(&config.redis_url).await?;
    let store = Arc::new(RedisTaskStore::new(client, redis));

    // Start webhook delivery
    let notifier = Notifier::start(store, NotifierConfig::from(&config))?;

    // Build router
    let app = create_router(AppState::new(notifier.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining webhook workers...");
    let report = notifier.shutdown().await;
    if report.drained {
        tracing::info!(elapsed_ms = report.elapsed.as_millis() as u64, "Notifier stopped");
    } else {
        tracing::warn!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Notifier forced to stop with work still in flight"
        );
    }

    tracing::info!("Siren API server exited.");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Received shutdown signal, stopping gracefully...");
}
