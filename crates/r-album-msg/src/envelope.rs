//! ---
//! album_section: "02-messaging-envelope"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Message envelope and wire codec."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Opaque correlation identifier shared by a request and its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Message envelope exchanged over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Invocation of a named action on the peer.
    Request(Request),
    /// Reply to a tracked request.
    Response(Response),
}

impl Envelope {
    /// Convenience accessor returning the envelope kind as a static string.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Request(_) => "request",
            Envelope::Response(_) => "response",
        }
    }

    /// Correlation identifier carried by the envelope, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Envelope::Request(request) => request.request_id.as_ref(),
            Envelope::Response(response) => Some(&response.request_id),
        }
    }

    /// Action name for requests; `None` for responses.
    pub fn action(&self) -> Option<&str> {
        match self {
            Envelope::Request(request) => Some(&request.action),
            Envelope::Response(_) => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(value: Request) -> Self {
        Envelope::Request(value)
    }
}

impl From<Response> for Envelope {
    fn from(value: Response) -> Self {
        Envelope::Response(value)
    }
}

/// Request half of the protocol.
///
/// A request without `request_id` is a one-way notification and never
/// produces a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Present when the caller expects a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// `"<ServiceName>:<MethodName>"`.
    pub action: String,
    /// Application data handed to the responder.
    #[serde(default)]
    pub payload: JsonValue,
}

impl Request {
    /// Build a tracked request that expects a reply under `request_id`.
    pub fn call(request_id: RequestId, action: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            request_id: Some(request_id),
            action: action.into(),
            payload,
        }
    }

    /// Build a fire-and-forget request.
    pub fn notification(action: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            request_id: None,
            action: action.into(),
            payload,
        }
    }

    /// Whether the peer must answer this request.
    pub fn expects_reply(&self) -> bool {
        self.request_id.is_some()
    }

    /// Split the action into `(service, method)` when it follows the
    /// `"<Service>:<Method>"` convention.
    pub fn service_method(&self) -> Option<(&str, &str)> {
        let (service, method) = self.action.split_once(':')?;
        if service.is_empty() || method.is_empty() || method.contains(':') {
            return None;
        }
        Some((service, method))
    }
}

/// Response half of the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Identifier of the request being answered.
    pub request_id: RequestId,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result data; meaningless when `error` is set.
    #[serde(default)]
    pub payload: JsonValue,
}

impl Response {
    /// Successful reply carrying `payload`.
    pub fn success(request_id: RequestId, payload: JsonValue) -> Self {
        Self {
            request_id,
            error: None,
            payload,
        }
    }

    /// Failed reply carrying `error`.
    pub fn failure(request_id: RequestId, error: impl Into<String>) -> Self {
        Self {
            request_id,
            error: Some(error.into()),
            payload: JsonValue::Null,
        }
    }

    /// Collapse the reply into the caller-facing outcome.
    pub fn into_result(self) -> std::result::Result<JsonValue, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.payload),
        }
    }
}
