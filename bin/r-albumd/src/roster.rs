//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "R-Album daemon runtime."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use parking_lot::RwLock;
use r_album_transport::Adaptor;
use serde::Serialize;
use tracing::info;

/// A connected peer as reported by `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    /// Connection id.
    pub id: String,
    /// Remote socket address, when known.
    pub remote: Option<SocketAddr>,
    /// Unix time of connection, in seconds.
    pub connected_at: u64,
}

/// Peers currently connected to the daemon, in connection order.
#[derive(Clone, Default)]
pub struct PeerRoster {
    peers: Arc<RwLock<IndexMap<String, (PeerInfo, Adaptor)>>>,
}

impl PeerRoster {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `adaptor` until it disconnects.
    pub fn add(&self, adaptor: &Adaptor, remote: Option<SocketAddr>) {
        let info = PeerInfo {
            id: adaptor.id().to_owned(),
            remote,
            connected_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|since| since.as_secs())
                .unwrap_or_default(),
        };
        self.peers
            .write()
            .insert(info.id.clone(), (info, adaptor.clone()));
        info!(peer = %adaptor.id(), remote = ?remote, "peer connected");

        let roster = self.clone();
        let id = adaptor.id().to_owned();
        adaptor.on_disconnect(move || {
            roster.remove(&id);
        });
    }

    /// Forget the peer with `id`.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.peers.write().shift_remove(id).is_some();
        if removed {
            info!(peer = id, "peer disconnected");
        }
        removed
    }

    /// Connected peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .values()
            .map(|(info, _)| info.clone())
            .collect()
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Close every connection.
    pub fn disconnect_all(&self) {
        let adaptors: Vec<Adaptor> = self
            .peers
            .read()
            .values()
            .map(|(_, adaptor)| adaptor.clone())
            .collect();
        for adaptor in adaptors {
            adaptor.disconnect();
        }
    }
}
