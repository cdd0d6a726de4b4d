//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use async_trait::async_trait;
use prometheus::{IntCounterVec, Opts, Registry};
use r_album_msg::Request;
use tracing::debug;

/// Observer run on every inbound request before it is dispatched.
///
/// Middleware cannot alter or reject the request; all registered observers
/// run concurrently and dispatch waits for every one of them.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Inspect the request.
    async fn observe(&self, request: &Request);
}

/// Logs each inbound request at debug level.
#[derive(Debug, Default, Clone)]
pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn observe(&self, request: &Request) {
        debug!(
            action = %request.action,
            request_id = request.request_id.as_ref().map(|id| id.as_str()).unwrap_or(""),
            tracked = request.expects_reply(),
            "inbound request"
        );
    }
}

/// Counts inbound requests per action.
#[derive(Clone)]
pub struct ActionRateCounter {
    requests: IntCounterVec,
}

impl ActionRateCounter {
    /// Register the counter with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new(
                "rpc_inbound_requests_total",
                "Inbound requests observed per action",
            ),
            &["action"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        Ok(Self { requests })
    }

    /// Requests seen so far for `action`.
    pub fn count(&self, action: &str) -> u64 {
        self.requests.with_label_values(&[action]).get()
    }
}

#[async_trait]
impl Middleware for ActionRateCounter {
    async fn observe(&self, request: &Request) {
        self.requests.with_label_values(&[&request.action]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rate_counter_tracks_actions_independently() {
        let registry = Registry::new();
        let counter = ActionRateCounter::register(&registry).expect("register");
        let list = Request::notification("Album:list", json!({}));
        let rename = Request::notification("Album:rename", json!({}));

        counter.observe(&list).await;
        counter.observe(&list).await;
        counter.observe(&rename).await;
        RequestLogger.observe(&rename).await;

        assert_eq!(counter.count("Album:list"), 2);
        assert_eq!(counter.count("Album:rename"), 1);
        assert_eq!(counter.count("Album:delete"), 0);
    }
}
