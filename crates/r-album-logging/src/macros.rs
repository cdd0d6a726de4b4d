//! ---
//! album_section: "03-logging"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Structured logging adapters and sinks."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
/// Emit an informational log enriched with call context.
#[macro_export]
macro_rules! rpc_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            connection = ctx.connection.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            request_id = ctx.request_id.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::rpc_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with call context.
#[macro_export]
macro_rules! rpc_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            connection = ctx.connection.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            request_id = ctx.request_id.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::rpc_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning enriched with call context.
#[macro_export]
macro_rules! rpc_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            connection = ctx.connection.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            request_id = ctx.request_id.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::rpc_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with call context.
#[macro_export]
macro_rules! rpc_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            connection = ctx.connection.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            request_id = ctx.request_id.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::rpc_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
