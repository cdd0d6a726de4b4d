//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus handles for dispatched calls.
#[derive(Clone)]
pub struct DispatchMetrics {
    calls: IntCounterVec,
    failures: IntCounterVec,
    in_flight: IntGauge,
}

impl DispatchMetrics {
    /// Register dispatch metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let calls = IntCounterVec::new(
            Opts::new("rpc_calls_total", "Calls that passed validation, per action"),
            &["action"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new(
                "rpc_call_failures_total",
                "Calls answered with an error, per action",
            ),
            &["action"],
        )?;
        let in_flight = IntGauge::with_opts(Opts::new(
            "rpc_calls_in_flight",
            "Handlers currently running",
        ))?;

        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            calls,
            failures,
            in_flight,
        })
    }

    pub(crate) fn observe_call(&self, action: &str) {
        self.calls.with_label_values(&[action]).inc();
    }

    pub(crate) fn observe_failure(&self, action: &str) {
        self.failures.with_label_values(&[action]).inc();
    }

    pub(crate) fn enter(&self) {
        self.in_flight.inc();
    }

    pub(crate) fn exit(&self) {
        self.in_flight.dec();
    }

    /// Calls counted for `action`.
    pub fn calls(&self, action: &str) -> u64 {
        self.calls.with_label_values(&[action]).get()
    }

    /// Failures counted for `action`.
    pub fn failures(&self, action: &str) -> u64 {
        self.failures.with_label_values(&[action]).get()
    }

    /// Handlers currently running.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_labelled_per_action() {
        let registry = Registry::new();
        let metrics = DispatchMetrics::register(&registry).expect("register metrics");
        metrics.observe_call("Echo:repeat");
        metrics.observe_call("Echo:repeat");
        metrics.observe_failure("Echo:fail");
        metrics.enter();

        assert_eq!(metrics.calls("Echo:repeat"), 2);
        assert_eq!(metrics.failures("Echo:fail"), 1);
        assert_eq!(metrics.failures("Echo:repeat"), 0);
        assert_eq!(metrics.in_flight(), 1);
        assert!(DispatchMetrics::register(&registry).is_err());
    }
}
