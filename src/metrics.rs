//! Metrics instrumentation for dnsdock.
//!
//! All metrics are prefixed with `dnsdock.`

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// How a query was resolved, for metrics labels.
#[derive(Debug, Clone, Copy)]
pub enum QueryOutcome {
    /// Answered from the registry.
    Answered,
    /// Name exists but not with the requested type.
    NoData,
    /// Name not found under the authoritative zone.
    NxDomain,
    /// Proxied to an upstream nameserver.
    Forwarded,
    /// Every upstream failed.
    Refused,
}

/// Record a DNS query.
pub fn record_query(record_type: &str, outcome: QueryOutcome, duration: Duration) {
    let outcome_str = match outcome {
        QueryOutcome::Answered => "answered",
        QueryOutcome::NoData => "no_data",
        QueryOutcome::NxDomain => "nxdomain",
        QueryOutcome::Forwarded => "forwarded",
        QueryOutcome::Refused => "refused",
    };

    counter!("dnsdock.query.count", "type" => record_type.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("dnsdock.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Record a forwarding attempt resolving (or exhausting every upstream).
pub fn record_forward(success: bool) {
    let result = if success { "success" } else { "exhausted" };
    counter!("dnsdock.forward.count", "result" => result).increment(1);
}

/// Record a docker event by action.
pub fn record_docker_event(action: &str) {
    counter!("dnsdock.docker.event.count", "action" => action.to_string()).increment(1);
}

/// Record a reconnect of the docker event loop.
pub fn record_docker_reconnect() {
    counter!("dnsdock.docker.reconnect.count").increment(1);
}

/// Record the current registry size.
pub fn record_registry_size(services: usize) {
    gauge!("dnsdock.registry.services.count").set(services as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
