//! # Metrics Module
//!
//! The gateway's Prometheus registry: request latency histogram, breaker and
//! health gauges, and the `active_connections` gauge, exposed in text
//! exposition format at `GET /metrics`. Registered against a real
//! `prometheus::Registry` rather than hand-rolled string concatenation, so
//! the latency metric is a genuine bucketed histogram.

use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use relay_core::breaker::BreakerState;
use relay_core::metrics_sink::MetricsSink;

const LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0];

pub struct GatewayMetrics {
    registry: Registry,
    http_request_duration_seconds: HistogramByLabels,
    service_health_status: IntGaugeVec,
    active_connections: IntGauge,
    circuit_breaker_status: IntGaugeVec,
}

/// `http_request_duration_seconds` is partitioned by `(method, route,
/// status_code)`, which `prometheus::HistogramVec` models natively; kept as
/// a thin wrapper so call sites read as a single named metric.
struct HistogramByLabels(prometheus::HistogramVec);

impl HistogramByLabels {
    fn observe(&self, method: &str, route: &str, status_code: u16, seconds: f64) {
        self.0
            .with_label_values(&[method, route, &status_code.to_string()])
            .observe(seconds);
    }
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_request_duration_seconds = prometheus::HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Gateway request latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "route", "status_code"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let service_health_status = IntGaugeVec::new(
            Opts::new("service_health_status", "1 if healthy, 0 if unhealthy"),
            &["service"],
        )?;
        registry.register(Box::new(service_health_status.clone()))?;

        let active_connections = IntGauge::new(
            "active_connections",
            "In-flight forwarded requests currently admitted",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let circuit_breaker_status = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_status",
                "CLOSED=0, OPEN=1, HALF_OPEN=2",
            ),
            &["service"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        #[cfg(target_os = "linux")]
        {
            use prometheus::process_collector::ProcessCollector;
            if let Err(err) = registry.register(Box::new(ProcessCollector::for_self())) {
                tracing::warn!(error = %err, "failed to register process metrics collector");
            }
        }

        Ok(Self {
            registry,
            http_request_duration_seconds: HistogramByLabels(http_request_duration_seconds),
            service_health_status,
            active_connections,
            circuit_breaker_status,
        })
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new().expect("metric names are fixed and cannot collide"))
    }

    pub fn observe_request(&self, method: &str, route: &str, status_code: u16, seconds: f64) {
        self.http_request_duration_seconds
            .observe(method, route, status_code, seconds);
    }

    /// Histogram handle for a fixed `(method, route, status_code)`, used
    /// when a caller wants an RAII `HistogramTimer` instead of hand-measuring
    /// `Instant::elapsed()`.
    pub fn request_timer(&self, method: &str, route: &str, status_code: u16) -> Histogram {
        self.http_request_duration_seconds
            .0
            .with_label_values(&[method, route, &status_code.to_string()])
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %err, "failed to encode prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl MetricsSink for GatewayMetrics {
    fn set_service_health(&self, service_type: &str, instance: &str, healthy: bool) {
        self.service_health_status
            .with_label_values(&[&format!("{service_type}-{instance}")])
            .set(if healthy { 1 } else { 0 });
    }

    fn set_breaker_state(&self, service_type: &str, state: BreakerState) {
        self.circuit_breaker_status
            .with_label_values(&[service_type])
            .set(state.as_metric_value());
    }

    fn set_active_connections(&self, count: i64) {
        self.active_connections.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_fixed_metric_names() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.observe_request("GET", "/sA/*", 200, 0.01);
        metrics.set_service_health("A", "10.0.0.1", true);
        metrics.set_breaker_state("A", BreakerState::Open);
        metrics.set_active_connections(3);

        let output = metrics.render();
        assert!(output.contains("http_request_duration_seconds"));
        assert!(output.contains("service_health_status"));
        assert!(output.contains("active_connections"));
        assert!(output.contains("circuit_breaker_status"));
    }
}
