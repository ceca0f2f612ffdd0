//! Message counters and request id generation.
//!
//! The host keeps cheap atomic counters for the traffic it routes. A
//! [`MetricsSnapshot`] can be taken at any time, e.g. for a diagnostics
//! request or a final log line on exit.

use crate::protocol::MessageKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generate a fresh id for an outgoing request.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Counters for the traffic routed by one host.
#[derive(Debug, Default)]
pub struct HostMetrics {
    /// Frames successfully parsed.
    pub messages_received: AtomicU64,

    /// Frames dropped because they were not valid messages.
    pub parse_failures: AtomicU64,

    /// Inbound requests handed to a handler.
    pub requests_dispatched: AtomicU64,

    /// Inbound events handed to a handler.
    pub events_dispatched: AtomicU64,

    /// Inbound requests and events naming an unregistered method.
    pub unknown_methods: AtomicU64,

    /// Replies that matched no outstanding request.
    pub orphaned_responses: AtomicU64,

    /// Handler runs that returned an error or panicked.
    pub handler_failures: AtomicU64,

    /// Total time spent in request handlers.
    pub handler_time_ms_total: AtomicU64,

    /// Outbound requests written.
    pub requests_sent: AtomicU64,

    /// Outbound successful responses written.
    pub responses_sent: AtomicU64,

    /// Outbound error responses written.
    pub errors_sent: AtomicU64,

    /// Outbound events written.
    pub events_sent: AtomicU64,

    /// Payload bytes written.
    pub bytes_written: AtomicU64,
}

impl HostMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an inbound message that parsed.
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame dropped because it did not parse.
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request handed to its handler.
    pub fn record_request_dispatched(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an event handed to its handler.
    pub fn record_event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a message with no registered handler.
    pub fn record_unknown_method(&self) {
        self.unknown_methods.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a reply that matched no outgoing request.
    pub fn record_orphaned_response(&self) {
        self.orphaned_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished handler run.
    pub fn record_handler(&self, success: bool, duration: Duration) {
        if !success {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.handler_time_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a message written to the channel.
    pub fn record_sent(&self, kind: MessageKind, bytes: usize) {
        let counter = match kind {
            MessageKind::Request => &self.requests_sent,
            MessageKind::Response => &self.responses_sent,
            MessageKind::ResponseError => &self.errors_sent,
            MessageKind::Event => &self.events_sent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            unknown_methods: self.unknown_methods.load(Ordering::Relaxed),
            orphaned_responses: self.orphaned_responses.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_time_ms_total: self.handler_time_ms_total.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            errors_sent: self.errors_sent.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub parse_failures: u64,
    pub requests_dispatched: u64,
    pub events_dispatched: u64,
    pub unknown_methods: u64,
    pub orphaned_responses: u64,
    pub handler_failures: u64,
    pub handler_time_ms_total: u64,
    pub requests_sent: u64,
    pub responses_sent: u64,
    pub errors_sent: u64,
    pub events_sent: u64,
    pub bytes_written: u64,
}

impl MetricsSnapshot {
    /// Average time per dispatched handler in milliseconds.
    pub fn avg_handler_time_ms(&self) -> f64 {
        let runs = self.requests_dispatched + self.events_dispatched;
        if runs == 0 {
            return 0.0;
        }
        self.handler_time_ms_total as f64 / runs as f64
    }

    /// Share of handler runs that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let runs = self.requests_dispatched + self.events_dispatched;
        if runs == 0 {
            return 100.0;
        }
        let failed = self.handler_failures.min(runs);
        ((runs - failed) as f64 / runs as f64) * 100.0
    }
}

/// Shared metrics type for thread-safe access.
pub type SharedMetrics = Arc<HostMetrics>;

/// Create a new shared metrics collector.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(HostMetrics::new())
}

/// Measures one handler run.
pub struct HandlerTimer {
    start: Instant,
    metrics: SharedMetrics,
}

impl HandlerTimer {
    /// Start timing a handler run.
    pub fn start(metrics: SharedMetrics) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Stop timing and record the outcome.
    pub fn stop(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        self.metrics.record_handler(success, duration);
        duration
    }
}
