//! `ChimeServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chime_core::{Generator, HistoryStore, Synthesizer};
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::HealthReport;
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::relay::TurnRelay;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::dispatcher::Dispatcher;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionContext, SessionTiming, run_session};

/// External services the relay talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Streaming text generation.
    pub generator: Arc<dyn Generator>,
    /// Text-to-speech.
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Conversation storage.
    pub store: Arc<dyn HistoryStore>,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Inbound router handed to each session.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            timing: SessionTiming::from(&*self.config),
            queue_capacity: self.config.outbound_queue_capacity,
            shutdown: self.shutdown.token(),
        }
    }
}

/// The Chime relay server.
pub struct ChimeServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ChimeServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let relay = Arc::new(TurnRelay::new(
            collaborators.generator,
            collaborators.synthesizer,
            collaborators.store,
        ));
        let dispatcher = Dispatcher::new(relay, config.welcome_message.as_str());
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.send_timeout())),
            config: Arc::new(config),
            dispatcher,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "chime server listening");
        Ok((local_addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let live = state.registry.len();
    if live >= state.config.max_connections {
        warn!(live, limit = state.config.max_connections, "connection limit reached, refusing upgrade");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let ctx = state.session_context();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let _ = run_session(sink, stream, ctx).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::snapshot(
        state.start_time,
        &state.registry,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
