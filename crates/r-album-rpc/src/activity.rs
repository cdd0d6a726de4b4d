//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use r_album_common::DispatchConfig;
use tokio::time::Instant;

/// Told when a call starts and finishes.
pub trait ActivityTracker: Send + Sync + 'static {
    /// A call is starting.
    fn enter(&self);
    /// A call has finished.
    fn exit(&self);
}

/// Tracker that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivity;

impl ActivityTracker for NoopActivity {
    fn enter(&self) {}
    fn exit(&self) {}
}

/// In-flight call count plus time of last activity.
///
/// Idle once no call is running and none has finished within `idle_after`.
#[derive(Debug)]
pub struct BusyCounter {
    in_flight: AtomicUsize,
    last_activity: Mutex<Option<Instant>>,
    idle_after: Duration,
}

impl Default for BusyCounter {
    fn default() -> Self {
        Self::new(DispatchConfig::default().idle_after)
    }
}

impl BusyCounter {
    /// Counter that considers the process idle after `idle_after` of quiet.
    pub fn new(idle_after: Duration) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            last_activity: Mutex::new(None),
            idle_after,
        }
    }

    /// Counter configured from the dispatch section.
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.idle_after)
    }

    /// Calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Record activity without a call, e.g. from a background job.
    pub fn touch(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }

    /// Time since the last recorded activity.
    pub fn quiet_for(&self) -> Option<Duration> {
        self.last_activity.lock().map(|at| at.elapsed())
    }

    /// Whether background work may run.
    pub fn is_idle(&self) -> bool {
        if self.in_flight() > 0 {
            return false;
        }
        self.quiet_for()
            .map_or(true, |quiet| quiet > self.idle_after)
    }
}

impl ActivityTracker for BusyCounter {
    fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_after_quiet_period() {
        let busy = BusyCounter::new(Duration::from_secs(10));
        assert!(busy.is_idle());

        busy.enter();
        assert!(!busy.is_idle());
        assert_eq!(busy.in_flight(), 1);

        busy.exit();
        assert_eq!(busy.in_flight(), 0);
        assert!(!busy.is_idle());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(busy.is_idle());
    }

    #[test]
    fn exit_without_enter_does_not_underflow() {
        let busy = BusyCounter::default();
        busy.exit();
        assert_eq!(busy.in_flight(), 0);
    }
}
