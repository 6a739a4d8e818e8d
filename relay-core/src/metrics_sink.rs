//! Observability hook implemented by the gateway's metrics registry.
//!
//! The core components never depend on a specific metrics backend; they call
//! into whatever [`MetricsSink`] the gateway binary wired them up with. This
//! keeps `relay-core` free of a hard `prometheus` dependency while still
//! letting every state transition publish a gauge without pulling in a
//! concrete metrics crate here.

use crate::breaker::BreakerState;

pub trait MetricsSink: Send + Sync {
    fn set_service_health(&self, service_type: &str, instance: &str, healthy: bool);
    fn set_breaker_state(&self, service_type: &str, state: BreakerState);
    fn set_active_connections(&self, count: i64);
}

/// Used in tests and anywhere a sink is required but observability is not
/// under test.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn set_service_health(&self, _service_type: &str, _instance: &str, _healthy: bool) {}
    fn set_breaker_state(&self, _service_type: &str, _state: BreakerState) {}
    fn set_active_connections(&self, _count: i64) {}
}
