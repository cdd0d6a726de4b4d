//! ---
//! album_section: "02-messaging-envelope"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Message envelope and wire codec."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use crate::{Envelope, MessagingError, Result};

/// Unit of data carried by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Serialized envelope, as carried by socket channels.
    Text(String),
    /// Envelope passed by value, as carried by thread channels.
    Structured(Envelope),
}

impl Frame {
    /// Serialize `envelope` into a text frame.
    pub fn text(envelope: &Envelope) -> Result<Self> {
        encode_text(envelope).map(Frame::Text)
    }

    /// Wrap `envelope` without serialization.
    pub fn structured(envelope: Envelope) -> Self {
        Frame::Structured(envelope)
    }

    /// Normalise the frame into an envelope, decoding text when needed.
    pub fn into_envelope(self) -> Result<Envelope> {
        match self {
            Frame::Text(text) => decode_text(&text),
            Frame::Structured(envelope) => Ok(envelope),
        }
    }

    /// Size hint used for logging; structured frames report zero.
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Structured(_) => 0,
        }
    }
}

/// Serialize an envelope to its JSON text form.
pub fn encode_text(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse JSON text into an envelope.
pub fn decode_text(text: &str) -> Result<Envelope> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MessagingError::Malformed("empty frame".to_owned()));
    }
    Ok(serde_json::from_str(trimmed)?)
}
