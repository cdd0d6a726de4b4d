//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::time::Duration;

use r_album_common::TransportConfig;
use r_album_logging::{rpc_debug, rpc_warn, LogContext};
use r_album_msg::{log_message, Envelope, MessageDirection};

use crate::Channel;

/// Geometric back-off applied while a channel is not ready.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed readiness check.
    pub initial_delay: Duration,
    /// Growth factor applied to each following delay.
    pub multiplier: f64,
    /// Readiness checks made before a send is abandoned.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl RetryPolicy {
    /// Build the policy described by the transport configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            initial_delay: config.initial_retry_delay,
            multiplier: config.retry_multiplier,
            max_retries: config.max_retries,
        }
    }

    /// Override the retry bound; values below one are clamped to one.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Delay slept after the `check`-th failed readiness check (1-based).
    pub fn delay_after(&self, check: u32) -> Duration {
        let exponent = check.saturating_sub(1) as i32;
        self.initial_delay.mul_f64(self.multiplier.powi(exponent))
    }

    /// Every delay the engine may sleep before abandoning, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_retries).map(|check| self.delay_after(check))
    }
}

/// Why a send never reached the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The channel stayed unready for every check.
    NotReady,
    /// The channel is closed.
    Closed,
    /// The binding rejected the write.
    WriteFailed(String),
}

/// Result of handing an envelope to the retry engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written on the given readiness check.
    Delivered {
        /// Readiness checks made, including the successful one.
        attempts: u32,
    },
    /// Dropped after `attempts` readiness checks.
    Abandoned {
        /// Readiness checks made before giving up.
        attempts: u32,
        /// Cause of the drop.
        reason: AbandonReason,
    },
}

impl SendOutcome {
    /// Whether the envelope was written.
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    /// Readiness checks made.
    pub fn attempts(&self) -> u32 {
        match self {
            SendOutcome::Delivered { attempts } | SendOutcome::Abandoned { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Write `envelope` once the channel reports ready, backing off geometrically.
///
/// Never fails: the outcome says whether the envelope went out. A closed
/// channel is abandoned without sleeping.
pub async fn deliver(
    channel: &dyn Channel,
    envelope: &Envelope,
    policy: &RetryPolicy,
    context: &LogContext<'_>,
) -> SendOutcome {
    let max_retries = policy.max_retries.max(1);
    for check in 1..=max_retries {
        if channel.is_closed() {
            rpc_warn!(context = *context, "channel closed, cannot send message");
            return SendOutcome::Abandoned {
                attempts: check,
                reason: AbandonReason::Closed,
            };
        }

        if channel.ready() {
            return match channel.write(envelope) {
                Ok(()) => {
                    log_message(MessageDirection::Outbound, envelope);
                    SendOutcome::Delivered { attempts: check }
                }
                Err(err) => {
                    rpc_warn!(context = *context, "write failed, send abandoned: {}", err);
                    SendOutcome::Abandoned {
                        attempts: check,
                        reason: AbandonReason::WriteFailed(err.to_string()),
                    }
                }
            };
        }

        if check < max_retries {
            let delay = policy.delay_after(check);
            log_message(MessageDirection::Retry, envelope);
            rpc_debug!(
                context = *context,
                "channel not ready, retrying in {:?} ({}/{})",
                delay,
                check,
                max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }

    rpc_warn!(
        context = *context,
        "channel not ready after {} checks, send abandoned",
        max_retries
    );
    SendOutcome::Abandoned {
        attempts: max_retries,
        reason: AbandonReason::NotReady,
    }
}
