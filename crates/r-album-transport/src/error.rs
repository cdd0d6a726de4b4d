//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use r_album_msg::MessagingError;
use thiserror::Error;

/// Error string sent when no handler is registered for an action.
pub const NOT_IMPLEMENTED: &str = "not implemented";
/// Error string used when a tracked call outlives its reply budget.
pub const TIMED_OUT: &str = "timed out awaiting response";
/// Error string used when writing to a closed channel.
pub const DISCONNECTED: &str = "channel disconnected";
/// Error string sent when a handler drops its responder without replying.
pub const NO_RESPONSE: &str = "no response produced";

/// Failures raised by channels and bindings.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is closed or its peer went away.
    #[error("channel disconnected")]
    Disconnected,
    /// The envelope could not be encoded for the wire.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] MessagingError),
    /// Establishing a client connection failed.
    #[error("failed to connect: {0}")]
    Connect(String),
    /// A worker thread could not be started or panicked.
    #[error("worker thread failed: {0}")]
    Worker(String),
}

/// Outcome reported to the caller of a tracked call when no payload arrives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The peer answered with an error string.
    #[error("{0}")]
    Remote(String),
    /// The reply budget elapsed first (only with `expire_pending`).
    #[error("timed out awaiting response")]
    TimedOut,
    /// The request never left this side.
    #[error("send abandoned after {attempts} attempts")]
    Abandoned {
        /// Readiness checks made before giving up.
        attempts: u32,
    },
    /// The adaptor holding the pending entry was dropped.
    #[error("channel disconnected")]
    Disconnected,
}

impl CallError {
    /// Error string as the peer sent it, if this is a remote failure.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            CallError::Remote(message) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_messages_match_display() {
        assert_eq!(TransportError::Disconnected.to_string(), DISCONNECTED);
        assert_eq!(CallError::TimedOut.to_string(), TIMED_OUT);
        assert_eq!(CallError::Remote("boom".into()).to_string(), "boom");
        assert_eq!(
            CallError::Remote("boom".into()).remote_message(),
            Some("boom")
        );
        assert_eq!(CallError::Disconnected.remote_message(), None);
    }
}
