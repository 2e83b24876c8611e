//! HTTP surface: the WebSocket route plus `/health` and `/metrics`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_settings::RelaySettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::connection::ConnectionLimits;
use crate::error::ServerError;
use crate::health;
use crate::hub::{self, HubHandle};
use crate::websocket::ws_handler;

/// How long [`ServerHandle::shutdown`] waits for the hub and listener.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub limits: ConnectionLimits,
    pub start_time: Instant,
    /// Present only when metrics are enabled.
    pub prometheus: Option<PrometheusHandle>,
}

pub fn build_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener, start the hub, and serve until shut down.
pub async fn start(
    settings: &RelaySettings,
    prometheus: Option<PrometheusHandle>,
) -> Result<ServerHandle, ServerError> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = hub::spawn(&settings.hub, shutdown.clone());

    let state = AppState {
        hub: hub.clone(),
        limits: ConnectionLimits::from(&settings.connection),
        start_time: Instant::now(),
        prometheus,
    };
    let router = build_router(state, &settings.server.ws_path);

    let token = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(error) = result {
            warn!(error = %error, "listener stopped with error");
        }
    });

    info!(
        %local_addr,
        ws_path = %settings.server.ws_path,
        retention = ?settings.hub.retention,
        "relay server listening"
    );

    Ok(ServerHandle {
        local_addr,
        hub,
        shutdown,
        tasks: vec![hub_task, server_task],
    })
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: HubHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// The bound address; differs from the configured one when port 0 was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Stop accepting connections and stop the hub. Stopping the hub closes
    /// every outbound queue, so connected clients receive a close frame.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        info!(task_count = self.tasks.len(), "shutting down");

        let drain = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.hub.snapshot().await {
        Ok(snapshot) => Json(health::health_check(state.start_time, snapshot)).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(health::hub_unavailable(state.start_time)),
        )
            .into_response(),
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
