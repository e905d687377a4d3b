//! Dispatch statistics and health reporting

use crate::dispatch::EventDispatcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Live dispatch counters, updated atomically from the dispatch path.
#[derive(Debug, Default)]
pub struct DispatchStats {
    events_raised: AtomicU64,
    events_skipped: AtomicU64,
    listeners_invoked: AtomicU64,
    listener_failures: AtomicU64,
    registrations: AtomicU64,
    unregistrations: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_raise(&self) {
        self.events_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skip(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invocations(&self, count: u64) {
        self.listeners_invoked.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unregistration(&self) {
        self.unregistrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of the counters.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events_raised: self.events_raised.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            listeners_invoked: self.listeners_invoked.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`DispatchStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DispatchStatsSnapshot {
    pub events_raised: u64,
    pub events_skipped: u64,
    pub listeners_invoked: u64,
    pub listener_failures: u64,
    pub registrations: u64,
    pub unregistrations: u64,
}

impl DispatchStatsSnapshot {
    /// Fraction of raises the activation registry short-circuited.
    pub fn skip_ratio(&self) -> f64 {
        if self.events_raised == 0 {
            0.0
        } else {
            self.events_skipped as f64 / self.events_raised as f64
        }
    }

    /// Fraction of invocations that failed.
    pub fn failure_ratio(&self) -> f64 {
        let attempts = self.listeners_invoked + self.listener_failures;
        if attempts == 0 {
            0.0
        } else {
            self.listener_failures as f64 / attempts as f64
        }
    }
}

/// Periodic health report over one dispatcher.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DispatchReport {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub stats: DispatchStatsSnapshot,
    pub live_listeners: u64,
    pub tracked_flags: u64,
    pub active_flags: u64,
    /// Overall health score (0.0 to 1.0)
    pub health: f32,
}

impl DispatchReport {
    pub fn is_healthy(&self) -> bool {
        self.health > 0.7
    }

    /// Actionable observations for an operator.
    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();
        if self.stats.failure_ratio() > 0.05 {
            recommendations.push(
                "More than 5% of listener invocations are failing - check plugin logs".to_string(),
            );
        }
        if self.live_listeners == 0 && self.stats.registrations > 0 {
            recommendations
                .push("All listeners have been unregistered - plugins may have unloaded".to_string());
        }
        if self.tracked_flags > 0 && self.active_flags == self.tracked_flags {
            recommendations.push(
                "Every activation flag is set; the raise-time short-circuit is not saving work"
                    .to_string(),
            );
        }
        recommendations
    }
}

/// Report generator bound to one dispatcher.
pub struct DispatchMonitor {
    start_time: Instant,
    dispatcher: std::sync::Arc<EventDispatcher>,
}

impl DispatchMonitor {
    pub fn new(dispatcher: std::sync::Arc<EventDispatcher>) -> Self {
        Self {
            start_time: Instant::now(),
            dispatcher,
        }
    }

    pub fn generate_report(&self) -> DispatchReport {
        let stats = self.dispatcher.stats().snapshot();
        let activation = self.dispatcher.activation();
        let health = self.calculate_health(&stats);
        DispatchReport {
            timestamp: current_timestamp(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            live_listeners: self.dispatcher.listener_count() as u64,
            tracked_flags: activation.tracked() as u64,
            active_flags: activation.active() as u64,
            stats,
            health,
        }
    }

    fn calculate_health(&self, stats: &DispatchStatsSnapshot) -> f32 {
        let mut health: f32 = 1.0;
        health -= (stats.failure_ratio() as f32) * 2.0;
        health.clamp(0.0, 1.0)
    }
}

/// Seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
