//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "R-Album daemon runtime."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Daemon runtime: WebSocket endpoint, peer roster and the built-in
//! `Server` service, reusable by the binary and by integration tests.
#![warn(missing_docs)]

pub mod roster;
pub mod server;
pub mod service;

pub use roster::{PeerInfo, PeerRoster};
pub use server::{spawn_server, AlbumServer};
pub use service::{server_service, DaemonMonitor, ServerStats};
