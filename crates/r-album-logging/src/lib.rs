//! ---
//! album_section: "03-logging"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Structured logging adapters and sinks."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Connection (adaptor instance) identifier.
    pub connection: Option<&'a str>,
    /// Channel binding name (`socket`, `thread`).
    pub channel: Option<&'a str>,
    /// Action the event relates to.
    pub action: Option<&'a str>,
    /// Correlation identifier of the call.
    pub request_id: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection identifier.
    pub fn with_connection(mut self, connection: &'a str) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Attach the channel binding name.
    pub fn with_channel(mut self, channel: &'a str) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Attach an action name.
    pub fn with_action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach a request identifier, if the call carries one.
    pub fn with_request_id(mut self, request_id: Option<&'a str>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl LifecycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (connect, disconnect, worker exit).
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    match outcome {
        LifecycleOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            connection = ctx.connection.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            message = %message
        ),
        LifecycleOutcome::Fault => tracing::event!(
            Level::WARN,
            event,
            outcome = outcome.as_str(),
            connection = ctx.connection.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_connection("conn-a")
            .with_action("Echo:repeat")
            .with_request_id(Some("r-1"));
        rpc_info!(context = ctx.clone(), "call dispatched");
        rpc_debug!("debug message");
        rpc_warn!(context = ctx.clone(), "send abandoned after {} attempts", 10);
        rpc_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn lifecycle_helper_emits() {
        init();
        let ctx = LogContext::new().with_channel("socket");
        log_lifecycle_event(
            Some(&ctx),
            "adaptor.connected",
            "peer connected",
            LifecycleOutcome::Success,
        );
        log_lifecycle_event(
            None,
            "adaptor.disconnected",
            "peer went away",
            LifecycleOutcome::Fault,
        );
    }
}
