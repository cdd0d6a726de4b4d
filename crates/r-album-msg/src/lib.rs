//! ---
//! album_section: "02-messaging-envelope"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Message envelope and wire codec."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! The only structure that crosses a channel is the [`Envelope`]. Socket
//! channels carry it as JSON text, thread channels pass it as a value; both
//! arrive as a [`Frame`] and are normalised through [`Frame::into_envelope`].
#![warn(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod logging;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failures raised while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame decoded but did not describe a valid envelope.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

pub use codec::{decode_text, encode_text, Frame};
pub use envelope::{Envelope, Request, RequestId, Response};
pub use logging::{log_message, DropReason, MessageDirection, MessagingMetricsExporter};
