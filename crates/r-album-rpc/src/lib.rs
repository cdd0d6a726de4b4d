//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Service descriptors, argument validation and the dispatcher that turns
//! inbound requests into exactly one reply.
#![warn(missing_docs)]

pub mod activity;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod locks;
pub mod metrics;
pub mod registry;
pub mod schema;

pub use activity::{ActivityTracker, BusyCounter, NoopActivity};
pub use context::{CallContext, Dependencies};
pub use descriptor::{
    HandlerFuture, MethodDescriptor, MethodSchema, ServiceDescriptor, ServiceSchema, StubImport,
};
pub use dispatcher::Dispatcher;
pub use locks::{CallLock, HeldLock, KeyedLocks, LockGuard, NoopLocks};
pub use metrics::DispatchMetrics;
pub use registry::{register_services, ServiceRegistry};
pub use schema::{ArgKind, ArgSpec, Args, SchemaError, TypedValue, ValidationError};
pub use r_album_transport::{ErrorSink, TracingErrorSink};

/// Crate prelude collecting what service authors need.
pub mod prelude {
    pub use super::context::{CallContext, Dependencies};
    pub use super::descriptor::{MethodDescriptor, ServiceDescriptor};
    pub use super::registry::{register_services, ServiceRegistry};
    pub use super::schema::{ArgKind, ArgSpec, Args};
}
