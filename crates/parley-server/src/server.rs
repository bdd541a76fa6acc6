use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_core::generator::SuggestionGenerator;
use parley_engine::{ConnectionRegistry, RelayEngine};
use parley_settings::ParleySettings;

use crate::client;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Reject values that would panic when a socket opens.
    pub fn validate(&self) -> Result<(), std::io::Error> {
        if self.max_send_queue == 0 {
            return Err(invalid_config("send queue capacity must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(invalid_config("heartbeat interval must be positive"));
        }
        Ok(())
    }
}

fn invalid_config(reason: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, reason)
}

impl From<&ParleySettings> for ServerConfig {
    fn from(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            heartbeat_interval: settings.server.heartbeat_interval(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: RelayEngine,
    pub config: Arc<ServerConfig>,
    pub metrics: Option<PrometheusHandle>,
    /// Cancelled on server shutdown; open sockets close when it fires.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    generator: Arc<dyn SuggestionGenerator>,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    config.validate()?;
    let registry = Arc::new(ConnectionRegistry::new());
    let engine = RelayEngine::new(registry, Arc::clone(&generator));
    let shutdown = CancellationToken::new();

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let state = AppState {
        engine: engine.clone(),
        config: Arc::new(config),
        metrics,
        shutdown: shutdown.clone(),
    };
    let router = build_router(state);

    tracing::info!(
        addr = %local_addr,
        backend = generator.name(),
        model = generator.model(),
        "parley server started"
    );

    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        engine,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    engine: RelayEngine,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn engine(&self) -> &RelayEngine {
        &self.engine
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.engine.registry().len()
    }

    /// Close every socket, stop accepting, and wait for the listener task.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
        tracing::info!("parley server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    client::handle_ws_connection(socket, state.engine, state.config, state.shutdown).await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "connections": state.engine.registry().len(),
    }))
}

/// Prometheus scrape endpoint. 404 when no recorder is installed.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => parley_telemetry::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
