//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Capability interface implemented once per binding.
//!
//! The adaptor only needs to know whether a channel can take a frame right
//! now, whether it is gone for good, and how to hand it an envelope. Retry
//! and correlation live above this seam so each binding stays small.

use std::fmt;

use r_album_msg::Envelope;

use crate::TransportError;

/// Binding behind a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Text frames over a WebSocket (or an in-memory text pair).
    Socket,
    /// Structured frames between threads.
    ThreadPort,
}

impl ChannelKind {
    /// Short name used in logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Socket => "socket",
            ChannelKind::ThreadPort => "thread",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound half of an established duplex pipe.
pub trait Channel: Send + Sync + 'static {
    /// Binding kind.
    fn kind(&self) -> ChannelKind;

    /// Whether a write issued now would be accepted.
    fn ready(&self) -> bool;

    /// Whether the channel is permanently unusable.
    fn is_closed(&self) -> bool;

    /// Hand one envelope to the binding.
    fn write(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Close the outbound side; the peer observes the end of its inbound stream.
    fn close(&self);
}
