//! HTTP and WebSocket handlers for the Relay server.
//!
//! The handlers only upgrade connections and resolve identities; everything
//! after the upgrade belongs to the connection actor.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_core::{ConnectionActor, Hub, HubHandle};
use tenvis_relay_transport::AxumConnection;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self { hub, config }
    }
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => metrics::init_metrics(),
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let (hub, _hub_task) = Hub::start(config.hub_config());
    metrics::spawn_reporter(hub.watch_stats());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?{}=<name>",
        addr, config.transport.websocket_path, config.transport.identity_param
    );

    let state = Arc::new(AppState::new(config, hub));
    serve(listener, state, shutdown_signal()).await
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler));

    if let Some(dir) = &state.config.static_dir {
        info!("Serving static files from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then give open
/// connections up to the configured timeout to finish.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let grace = Duration::from_millis(state.config.shutdown_timeout_ms);
    let app = router(state);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = stop_rx.await;
        })
        .await
    });

    tokio::select! {
        result = &mut server => {
            result.context("Server task failed")?.context("Server error")?;
            return Ok(());
        }
        _ = shutdown => {}
    }

    info!("Shutting down server...");
    let _ = stop_tx.send(());

    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            result.context("Server task failed")?.context("Server error")?;
            info!("Server stopped");
        }
        Err(_) => warn!(
            timeout_ms = grace.as_millis() as u64,
            "Shutdown timed out, dropping open connections"
        ),
    }

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.registered,
        "broadcasts": stats.broadcasts,
        "delivered": stats.delivered,
        "dropped": stats.dropped,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<Vec<(String, String)>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let identity = first_param(&params, &state.config.transport.identity_param);

    ws.max_message_size(state.config.transport.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(remote = %addr, error = %e, "WebSocket upgrade failed");
            metrics::record_error("upgrade");
        })
        .on_upgrade(move |socket| handle_websocket(socket, addr, identity, state))
}

/// First value of `key`; later repeats are ignored.
fn first_param(params: &[(String, String)], key: &str) -> Option<String> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

/// Hand an upgraded socket to a connection actor and run it to completion.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    identity: Option<String>,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!(remote = %addr, identity = ?identity, "WebSocket connected");

    let connection =
        AxumConnection::new(socket, state.config.transport.max_message_size).with_remote_addr(addr);

    ConnectionActor::new(
        Arc::new(state.hub.clone()),
        Box::new(connection),
        identity.as_deref(),
    )
    .with_queue_capacity(state.config.hub.queue_capacity)
    .run()
    .await;

    debug!(remote = %addr, "WebSocket disconnected");
}
