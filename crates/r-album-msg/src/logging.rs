//! ---
//! album_section: "02-messaging-envelope"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Message envelope and wire codec."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::Envelope;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Envelope written to a channel.
    Outbound,
    /// Envelope read from a channel.
    Inbound,
    /// Send postponed because the channel was not ready.
    Retry,
}

/// Emit a structured log entry for envelope activity.
pub fn log_message(direction: MessageDirection, envelope: &Envelope) {
    debug!(
        kind = envelope.kind(),
        request_id = envelope.request_id().map(|id| id.as_str()).unwrap_or(""),
        action = envelope.action().unwrap_or(""),
        direction = ?direction,
        "messaging activity"
    );
}

/// Why an envelope was counted as dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The retry engine gave up or the binding refused the write.
    Undeliverable,
    /// Inbound bytes did not parse as an envelope.
    Undecodable,
    /// A response matched no pending call.
    Unmatched,
}

impl DropReason {
    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Undeliverable => "undeliverable",
            DropReason::Undecodable => "undecodable",
            DropReason::Unmatched => "unmatched",
        }
    }
}

/// Prometheus metric handles for envelope traffic, labelled by channel kind.
#[derive(Clone)]
pub struct MessagingMetricsExporter {
    sent: IntCounterVec,
    received: IntCounterVec,
    dropped: IntCounterVec,
    latency: HistogramVec,
}

impl MessagingMetricsExporter {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sent = IntCounterVec::new(
            Opts::new("rpc_envelopes_sent_total", "Envelopes written to channels"),
            &["channel", "kind"],
        )?;
        let received = IntCounterVec::new(
            Opts::new("rpc_envelopes_received_total", "Envelopes read from channels"),
            &["channel", "kind"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new(
                "rpc_envelopes_dropped_total",
                "Envelopes abandoned, undecodable or matching no pending call",
            ),
            &["channel", "reason"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "rpc_call_roundtrip_seconds",
                "Observed latency between request send and matching response",
            ),
            &["channel"],
        )?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            sent,
            received,
            dropped,
            latency,
        })
    }

    /// Record an envelope written to `channel`.
    pub fn observe_sent(&self, channel: &str, envelope: &Envelope) {
        self.sent
            .with_label_values(&[channel, envelope.kind()])
            .inc();
    }

    /// Record an envelope read from `channel`.
    pub fn observe_received(&self, channel: &str, envelope: &Envelope) {
        self.received
            .with_label_values(&[channel, envelope.kind()])
            .inc();
    }

    /// Record a dropped envelope.
    pub fn observe_dropped(&self, channel: &str, reason: DropReason) {
        self.dropped
            .with_label_values(&[channel, reason.as_str()])
            .inc();
    }

    /// Record call round-trip latency.
    pub fn observe_latency(&self, channel: &str, duration: Duration) {
        self.latency
            .with_label_values(&[channel])
            .observe(duration.as_secs_f64());
    }
}
