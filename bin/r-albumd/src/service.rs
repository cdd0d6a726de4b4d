//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "R-Album daemon runtime."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_album_rpc::{BusyCounter, HeldLock, KeyedLocks, MethodDescriptor, SchemaError, ServiceDescriptor};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use crate::roster::{PeerInfo, PeerRoster};

/// Daemon-wide bookkeeping shared by the routes and the `Server` service.
pub struct DaemonMonitor {
    /// Connected peers.
    pub roster: PeerRoster,
    /// Busy/idle tracking for every dispatched call.
    pub busy: Arc<BusyCounter>,
    /// Per-call keyed locks.
    pub locks: Arc<KeyedLocks>,
    started: Instant,
}

/// Snapshot served by `/stats` and `Server:stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    /// Number of connected peers.
    pub peers: usize,
    /// Connected peers.
    pub connections: Vec<PeerInfo>,
    /// Whether no call ran recently.
    pub idle: bool,
    /// Calls currently running.
    pub in_flight: usize,
    /// Locks currently held, longest first.
    pub locks: Vec<HeldLock>,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
}

impl DaemonMonitor {
    /// Fresh monitor; `idle_after` sets when the daemon counts as idle.
    pub fn new(idle_after: Duration) -> Self {
        Self {
            roster: PeerRoster::new(),
            busy: Arc::new(BusyCounter::new(idle_after)),
            locks: Arc::new(KeyedLocks::new()),
            started: Instant::now(),
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            peers: self.roster.len(),
            connections: self.roster.peers(),
            idle: self.busy.is_idle(),
            in_flight: self.busy.in_flight(),
            locks: self.locks.held(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Built-in `Server` service: health, statistics and per-connection tuning.
pub fn server_service() -> Result<ServiceDescriptor, SchemaError> {
    Ok(ServiceDescriptor::new("Server")
        .method(
            "ping",
            MethodDescriptor::new(&[], |_context, _args| async { Ok(json!("pong")) })?,
        )
        .method(
            "stats",
            MethodDescriptor::new(&[], |context, _args| async move {
                let monitor = context.dependency::<DaemonMonitor>()?;
                Ok(serde_json::to_value(monitor.stats())?)
            })?,
        )
        .method(
            "setMaxRetries",
            MethodDescriptor::new(&["retries:integer"], |context, args| async move {
                let retries = args
                    .i64("retries")
                    .filter(|retries| *retries >= 1)
                    .ok_or_else(|| anyhow::anyhow!("retries must be a positive integer"))?;
                context
                    .adaptor()
                    .set_max_retries(u32::try_from(retries).unwrap_or(u32::MAX));
                Ok(json!(null))
            })?
            .no_payload(),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_album_rpc::{register_services, Dependencies};
    use r_album_transport::{socket, AdaptorOptions, CallError};

    #[tokio::test]
    async fn server_service_reports_health_and_stats() {
        let monitor = Arc::new(DaemonMonitor::new(Duration::from_secs(10)));
        let (client, server) = socket::pair(AdaptorOptions::default());
        monitor.roster.add(&server, None);
        register_services(
            &server,
            vec![server_service().expect("server service")],
            Dependencies::new().with_shared(monitor.clone()),
        );

        assert_eq!(client.call("Server:ping", json!({})).await, Ok(json!("pong")));
        let stats = client.call("Server:stats", json!({})).await.expect("stats");
        assert_eq!(stats["peers"], json!(1));
        assert_eq!(stats["connections"][0]["id"], json!(server.id()));
        assert_eq!(stats["in_flight"], json!(0));
    }

    #[tokio::test]
    async fn set_max_retries_tunes_the_serving_connection() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        register_services(
            &server,
            vec![server_service().expect("server service")],
            Dependencies::new(),
        );

        let reply = client
            .call("Server:setMaxRetries", json!({ "retries": 3 }))
            .await
            .expect("set");
        assert_eq!(reply, json!({}));
        assert_eq!(server.retry_policy().max_retries, 3);

        let err = client
            .call("Server:setMaxRetries", json!({ "retries": 0 }))
            .await
            .expect_err("rejected");
        assert_eq!(
            err,
            CallError::Remote("retries must be a positive integer".into())
        );
    }
}
