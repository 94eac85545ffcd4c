use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tillsync_telemetry::SqliteLogSink;

use crate::handlers;
use crate::service::SyncService;

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn SyncService>,
    /// Persisted warn+ logs; `None` when SQLite logging is off.
    pub logs: Option<Arc<SqliteLogSink>>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/global-db-failed", post(handlers::global_db_failed))
        .route("/api/reconnect-global-db", post(handlers::reconnect_global_db))
        .route("/api/db-status", get(handlers::db_status))
        .route("/api/sync", post(handlers::sync_now))
        .route("/api/points/balance", get(handlers::points_balance))
        .route("/api/logs", get(handlers::logs))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn start(
    config: ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "tillsync server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server task to finish after shutdown was requested.
    pub async fn stopped(self) {
        let _ = self.server.await;
    }
}
