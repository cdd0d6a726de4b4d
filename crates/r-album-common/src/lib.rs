//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Shared primitives and utilities for the core runtime."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Core shared primitives for the R-Album RPC workspace.
//! This crate exposes configuration loading and tracing bootstrap
//! utilities consumed by the transport, dispatcher and binaries.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, DispatchConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, ServerConfig,
    TransportConfig,
};
pub use logging::{init_tracing, LogFormat};
