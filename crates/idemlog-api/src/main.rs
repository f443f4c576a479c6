//! idemlog API server entry point.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use idemlog_api::config::Config;
use idemlog_api::state::AppState;
use idemlog_core::clock::SystemClock;
use idemlog_pipeline::{Consumer, IntakeQueue};
use idemlog_store::SqliteDedupStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Read configuration from environment.
    let config = Config::from_env()?;

    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting idemlog API server");

    // Open the dedup store. Without it there is nothing to serve.
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store = Arc::new(
        SqliteDedupStore::open_with(
            config.db_path(),
            config.store_options(),
            Arc::new(SystemClock),
        )
        .await?,
    );

    // Build the pipeline and start draining.
    let queue = Arc::new(IntakeQueue::new(config.queue_max_size)?);
    let consumer = Arc::new(Consumer::new(
        Arc::clone(&queue),
        store.clone(),
        config.consumer_config(),
    ));
    consumer.start().await;
    tracing::info!(capacity = queue.capacity(), "intake queue ready");

    // Build application state and router.
    let app_state = AppState::new(
        store.clone(),
        queue,
        Arc::clone(&consumer),
        Arc::new(SystemClock),
    );
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = idemlog_api::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server.
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("invalid HOST:PORT combination: {e}"))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain everything already admitted before releasing the store.
    tracing::info!("HTTP server stopped; draining intake queue");
    consumer.stop().await;
    store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
