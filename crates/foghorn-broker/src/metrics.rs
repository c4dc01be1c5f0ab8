//! Pluggable observation of broker activity.

use metrics::{counter, gauge, histogram};
use tracing::info;

use crate::dispatch::DispatchReport;

/// Gauge: clients currently registered.
pub const CLIENTS_CONNECTED: &str = "sse_clients_connected";
/// Counter: deliveries accepted into client queues.
pub const DELIVERIES_TOTAL: &str = "sse_event_deliveries_total";
/// Counter: deliveries that failed because the client was gone.
pub const DELIVERY_FAILURES_TOTAL: &str = "sse_event_delivery_failures_total";
/// Histogram: wall time of a full fan-out, in seconds.
pub const FANOUT_SECONDS: &str = "sse_event_fanout_seconds";
/// Counter: heartbeat frames dropped on full client queues.
pub const PINGS_DROPPED_TOTAL: &str = "sse_pings_dropped_total";

/// Observer of broker activity.
///
/// Hooks run inside the broker task, so implementations must stay cheap.
/// Every method defaults to a no-op; implement only what you watch.
pub trait BrokerMetrics: Send + Sync {
    /// Called whenever the registered-client count changes.
    fn client_count(&self, n: usize) {
        let _ = n;
    }

    /// Called after every fan-out completes.
    fn event_delivered(&self, report: &DispatchReport) {
        let _ = report;
    }

    /// Called when a heartbeat frame is dropped on a full queue.
    fn ping_dropped(&self) {}
}

/// Discards every observation. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl BrokerMetrics for NoopMetrics {}

/// Logs delivery summaries through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl BrokerMetrics for LogMetrics {
    fn client_count(&self, n: usize) {
        info!(clients = n, "client count changed");
    }

    fn event_delivered(&self, report: &DispatchReport) {
        let mean_enqueue_us = report.mean_latency().map(|d| d.as_micros() as u64);
        info!(
            matched = report.matched,
            delivered = report.delivered(),
            failed = report.failed(),
            mean_enqueue_us,
            "event dispatched"
        );
    }

    fn ping_dropped(&self) {
        info!("heartbeat frame dropped on full queue");
    }
}

/// Forwards observations to the `metrics` facade, under the constants
/// defined in this module. Pair with any installed recorder, e.g. the
/// Prometheus exporter wired up by the `foghorn` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl BrokerMetrics for RecorderMetrics {
    fn client_count(&self, n: usize) {
        gauge!(CLIENTS_CONNECTED).set(n as f64);
    }

    fn event_delivered(&self, report: &DispatchReport) {
        counter!(DELIVERIES_TOTAL).increment(report.delivered() as u64);
        counter!(DELIVERY_FAILURES_TOTAL).increment(report.failed() as u64);
        histogram!(FANOUT_SECONDS).record(report.elapsed.as_secs_f64());
    }

    fn ping_dropped(&self) {
        counter!(PINGS_DROPPED_TOTAL).increment(1);
    }
}
