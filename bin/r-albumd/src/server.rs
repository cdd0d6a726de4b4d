//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "R-Album daemon runtime."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Registry, TextEncoder, TEXT_FORMAT};
use r_album_common::AppConfig;
use r_album_msg::MessagingMetricsExporter;
use r_album_rpc::{DispatchMetrics, ServiceDescriptor, ServiceRegistry, TracingErrorSink};
use r_album_transport::{socket, ActionRateCounter, AdaptorOptions, RequestLogger};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::service::{server_service, DaemonMonitor, ServerStats};

const LOCK_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ServerState {
    registry: ServiceRegistry,
    options: AdaptorOptions,
    rate: Option<ActionRateCounter>,
    monitor: Arc<DaemonMonitor>,
    metrics: Option<Arc<Registry>>,
}

impl ServerState {
    fn serve_socket(&self, socket: WebSocket, remote: SocketAddr) {
        let adaptor = socket::accept(socket, self.options.clone());
        adaptor.use_middleware(RequestLogger);
        if let Some(rate) = &self.rate {
            adaptor.use_middleware(rate.clone());
        }
        self.registry.attach(&adaptor);
        self.monitor.roster.add(&adaptor, Some(remote));
    }
}

/// Running daemon HTTP/WebSocket server.
pub struct AlbumServer {
    addr: SocketAddr,
    monitor: Arc<DaemonMonitor>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
    lock_monitor: JoinHandle<()>,
}

impl AlbumServer {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared daemon bookkeeping.
    pub fn monitor(&self) -> &Arc<DaemonMonitor> {
        &self.monitor
    }

    /// Close every peer, stop accepting and wait for the server to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.lock_monitor.abort();
        self.monitor.roster.disconnect_all();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Serve `services` plus the built-in `Server` service as configured.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_server(config: &AppConfig, services: Vec<ServiceDescriptor>) -> Result<AlbumServer> {
    let monitor = Arc::new(DaemonMonitor::new(config.dispatch.idle_after));
    let dependencies = r_album_rpc::Dependencies::new().with_shared(monitor.clone());

    let mut all_services = vec![server_service()?];
    all_services.extend(services);
    let mut registry = ServiceRegistry::new(all_services)
        .with_dependencies(dependencies)
        .with_activity(monitor.busy.clone())
        .with_locks(monitor.locks.clone())
        .with_error_sink(Arc::new(TracingErrorSink));

    let mut options = AdaptorOptions::new(config.transport.clone());
    let mut rate = None;
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Registry::new());
        options = options.with_metrics(MessagingMetricsExporter::register(&metrics)?);
        registry = registry.with_metrics(DispatchMetrics::register(&metrics)?);
        rate = Some(ActionRateCounter::register(&metrics)?);
        Some(metrics)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let state = ServerState {
        registry,
        options,
        rate,
        monitor: monitor.clone(),
        metrics: metrics.clone(),
    };
    let mut router = Router::new()
        .route(&config.server.ws_path, get(ws_handler))
        .route("/ping", get(ping))
        .route("/stats", get(stats));
    if metrics.is_some() {
        router = router.route(&config.metrics.path, get(metrics_handler));
    }
    let router = router.with_state(state);

    let listener = StdTcpListener::bind(config.server.listen)
        .with_context(|| format!("failed to bind listener {}", config.server.listen))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure listener as non-blocking")?;
    let addr = listener.local_addr().context("failed to read bound address")?;
    let tcp_listener = TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let lock_monitor = monitor
        .locks
        .spawn_monitor(LOCK_MONITOR_INTERVAL, config.dispatch.long_lock_warning);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let ws_path = config.server.ws_path.clone();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, path = %ws_path, "rpc server listening");
        if let Err(err) = axum::serve(
            tcp_listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
        {
            error!(address = %addr, error = %err, "rpc server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(AlbumServer {
        addr,
        monitor,
        shutdown: Some(shutdown_tx),
        task,
        lock_monitor,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
) -> Response {
    ws.on_upgrade(move |socket| async move { state.serve_socket(socket, remote) })
}

async fn ping() -> &'static str {
    "pong"
}

async fn stats(State(state): State<ServerState>) -> Json<ServerStats> {
    Json(state.monitor.stats())
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    let Some(registry) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}
