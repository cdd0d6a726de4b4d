//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use tracing::error;

/// Out-of-band destination for failures that cannot be sent back to a caller.
pub trait ErrorSink: Send + Sync + 'static {
    /// Record `error` raised while serving `action`.
    fn capture(&self, action: &str, error: &anyhow::Error);
}

/// Writes captured failures to the log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn capture(&self, action: &str, error: &anyhow::Error) {
        error!(action, error = format!("{error:#}"), "unreported rpc failure");
    }
}
