//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Duplex RPC transport: one adaptor surface over socket and thread-port
//! channels, with request/response correlation and a bounded send retry.
#![warn(missing_docs)]

pub mod adaptor;
pub mod channel;
pub mod correlator;
pub mod error;
pub mod middleware;
pub mod retry;
pub mod sink;
pub mod socket;
pub mod thread;

pub use adaptor::{Adaptor, AdaptorOptions, Registration, Responder};
pub use channel::{Channel, ChannelKind};
pub use correlator::{PendingCall, PendingCalls};
pub use error::{CallError, TransportError, DISCONNECTED, NOT_IMPLEMENTED, NO_RESPONSE, TIMED_OUT};
pub use middleware::{ActionRateCounter, Middleware, RequestLogger};
pub use retry::{deliver, AbandonReason, RetryPolicy, SendOutcome};
pub use sink::{ErrorSink, TracingErrorSink};
pub use thread::{port_pair, spawn_worker, WorkerHandle};
