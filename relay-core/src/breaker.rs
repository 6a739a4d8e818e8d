//! Per-service-type circuit breaker.
//!
//! Three states (`CLOSED`, `OPEN`, `HALF_OPEN`) gate dispatch for a single
//! service type. Each [`CircuitBreaker`] owns exactly one [`BreakerRecord`]
//! behind its own `RwLock`; breakers for different service types never share
//! a lock, so a slow probe on one service cannot stall the gate on another.
//!
//! Failures and reroutes are tracked as distinct, independently tripping
//! events rather than folded into a single counter — see the transition
//! table in the method docs below.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::duration_serde;
use crate::metrics_sink::MetricsSink;

/// The three states a per-service breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Numeric encoding published to the `circuit_breaker_status` gauge.
    pub fn as_metric_value(self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF-OPEN",
        }
    }
}

/// Tunables for the breaker, one set shared by every service type's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within `error_timeout` before tripping OPEN.
    pub error_threshold: u32,
    /// OPEN dwell time, and the window within which failures accumulate.
    #[serde(with = "duration_serde")]
    pub error_timeout: Duration,
    /// Consecutive reroutes before tripping OPEN.
    pub reroute_threshold: u32,
    /// Window within which reroutes count as consecutive.
    #[serde(with = "duration_serde")]
    pub reroute_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            error_timeout: Duration::from_millis(17_500),
            reroute_threshold: 2,
            reroute_window: Duration::from_millis(5_000),
        }
    }
}

/// The mutable state of one service type's breaker.
#[derive(Debug, Clone)]
struct BreakerRecord {
    state: BreakerState,
    failures: u32,
    last_failure_at: Option<Instant>,
    reroutes: u64,
    consecutive_reroutes: u32,
    last_reroute_at: Option<Instant>,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            last_failure_at: None,
            reroutes: 0,
            consecutive_reroutes: 0,
            last_reroute_at: None,
        }
    }
}

/// What a gate check (`dispatch_attempt`) decided for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Breaker is CLOSED or just transitioned OPEN->HALF_OPEN: forward.
    Admit,
    /// Breaker is OPEN and the error timeout has not elapsed: reject.
    Reject,
}

/// A single service type's circuit breaker.
pub struct CircuitBreaker {
    service_type: String,
    config: CircuitBreakerConfig,
    record: RwLock<BreakerRecord>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    pub fn new(
        service_type: impl Into<String>,
        config: CircuitBreakerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            config,
            record: RwLock::new(BreakerRecord::default()),
            metrics,
        }
    }

    pub fn shared(
        service_type: impl Into<String>,
        config: CircuitBreakerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        Arc::new(Self::new(service_type, config, metrics))
    }

    /// Publishes the current state to the `circuit_breaker_status` gauge.
    /// Called after every transition, outside the record's write lock.
    fn publish_state(&self, state: BreakerState) {
        self.metrics.set_breaker_state(&self.service_type, state);
    }

    pub async fn state(&self) -> BreakerState {
        self.record.read().await.state
    }

    pub async fn failures(&self) -> u32 {
        self.record.read().await.failures
    }

    /// The gate: taken once per request, before selection. Consumes the
    /// OPEN->HALF_OPEN transition as a side effect when the error timeout has
    /// elapsed, and records the resulting probe attempt as a reroute.
    pub async fn dispatch_attempt(&self) -> DispatchDecision {
        let decision = {
            let mut rec = self.record.write().await;
            match rec.state {
                BreakerState::Closed | BreakerState::HalfOpen => Some(DispatchDecision::Admit),
                BreakerState::Open => {
                    let elapsed = rec
                        .last_failure_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::MAX);
                    if elapsed > self.config.error_timeout {
                        rec.state = BreakerState::HalfOpen;
                        rec.consecutive_reroutes = 0;
                        tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                        None
                    } else {
                        Some(DispatchDecision::Reject)
                    }
                }
            }
        };

        match decision {
            Some(decision) => decision,
            None => {
                self.publish_state(BreakerState::HalfOpen);
                DispatchDecision::Admit
            }
        }
    }

    /// Record a forward that produced a non-5xx response.
    pub async fn record_success(&self) {
        let transitioned_to_closed = {
            let mut rec = self.record.write().await;
            rec.consecutive_reroutes = 0;
            match rec.state {
                BreakerState::Closed => false,
                BreakerState::HalfOpen => {
                    rec.state = BreakerState::Closed;
                    rec.failures = 0;
                    rec.last_failure_at = None;
                    tracing::info!("circuit breaker HALF_OPEN -> CLOSED on successful probe");
                    true
                }
                BreakerState::Open => false,
            }
        };
        if transitioned_to_closed {
            self.publish_state(BreakerState::Closed);
        }
    }

    /// Record a transport error, timeout, or 5xx response.
    pub async fn record_failure(&self) {
        let opened = {
            let mut rec = self.record.write().await;
            let now = Instant::now();
            let within_window = rec
                .last_failure_at
                .map(|t| now.duration_since(t) <= self.config.error_timeout)
                .unwrap_or(false);

            let next_failures = if within_window || rec.last_failure_at.is_none() {
                rec.failures + 1
            } else {
                1
            };

            if next_failures >= self.config.error_threshold {
                rec.state = BreakerState::Open;
                rec.failures = next_failures;
                rec.last_failure_at = Some(now);
                tracing::warn!(failures = next_failures, "circuit breaker tripped OPEN on failures");
                true
            } else {
                rec.failures = next_failures;
                rec.last_failure_at = Some(now);
                if rec.state == BreakerState::HalfOpen {
                    rec.state = BreakerState::Open;
                    tracing::warn!("circuit breaker HALF_OPEN -> OPEN on probe failure");
                    true
                } else {
                    false
                }
            }
        };
        if opened {
            self.publish_state(BreakerState::Open);
        }
    }

    /// Record a reroute: the OPEN->HALF_OPEN probe consumption, or (in a
    /// future revision) an additional in-request retry attempt. Applies the
    /// same guard CLOSED->OPEN uses, including while HALF_OPEN — the probe's
    /// own reroute must not itself retrip the breaker, or a successful probe
    /// could never reach `record_success` in the HALF_OPEN state needed to
    /// close it.
    pub async fn record_reroute(&self) {
        let opened = {
            let mut rec = self.record.write().await;
            let now = Instant::now();
            rec.reroutes += 1;

            let within_window = rec
                .last_reroute_at
                .map(|t| now.duration_since(t) <= self.config.reroute_window)
                .unwrap_or(false);

            rec.consecutive_reroutes = if within_window {
                rec.consecutive_reroutes + 1
            } else {
                1
            };
            rec.last_reroute_at = Some(now);

            if rec.state != BreakerState::Open
                && rec.consecutive_reroutes >= self.config.reroute_threshold
            {
                rec.state = BreakerState::Open;
                rec.last_failure_at = Some(now);
                tracing::warn!(
                    consecutive_reroutes = rec.consecutive_reroutes,
                    "circuit breaker tripped OPEN on reroutes"
                );
                true
            } else {
                false
            }
        };
        if opened {
            self.publish_state(BreakerState::Open);
        }
    }

    /// Reset `consecutive_reroutes` if the reroute window has lapsed since
    /// the last reroute. This invariant is otherwise maintained
    /// by `record_reroute`/`record_success`/`dispatch_attempt` directly; this
    /// is exposed for callers that want to observe a decayed view without
    /// recording a new event (e.g. the status endpoint).
    pub async fn decay_reroute_window(&self) {
        let mut rec = self.record.write().await;
        if let Some(last) = rec.last_reroute_at {
            if last.elapsed() > self.config.reroute_window {
                rec.consecutive_reroutes = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold: 3,
            error_timeout: Duration::from_millis(50),
            reroute_threshold: 2,
            reroute_window: Duration::from_millis(50),
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        states: StdMutex<Vec<(String, BreakerState)>>,
    }

    impl MetricsSink for RecordingSink {
        fn set_service_health(&self, _service_type: &str, _instance: &str, _healthy: bool) {}
        fn set_breaker_state(&self, service_type: &str, state: BreakerState) {
            self.states
                .lock()
                .unwrap()
                .push((service_type.to_string(), state));
        }
        fn set_active_connections(&self, _count: i64) {}
    }

    #[tokio::test]
    async fn three_failures_trip_open() {
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, BreakerState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn open_rejects_until_timeout_then_half_opens() {
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert_eq!(cb.dispatch_attempt().await, DispatchDecision::Reject);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cb.dispatch_attempt().await, DispatchDecision::Admit);
        assert_eq!(cb.state().await, BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_success_closes_and_resets_failures() {
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        cb.dispatch_attempt().await;
        cb.record_success().await;
        assert_eq!(cb.state().await, BreakerState::Closed);
        assert_eq!(cb.failures().await, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        cb.dispatch_attempt().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_probe_reroute_does_not_block_recovery() {
        // Mirrors the router's own call sequence: dispatch_attempt()
        // consumes the OPEN->HALF_OPEN transition, the router then records
        // that probe as a reroute, and only afterwards learns the outcome.
        // A single probe reroute must not retrip the breaker before
        // record_success() gets a chance to close it.
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cb.dispatch_attempt().await, DispatchDecision::Admit);
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        cb.record_reroute().await;
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, BreakerState::Closed);
        assert_eq!(cb.failures().await, 0);
    }

    #[tokio::test]
    async fn consecutive_reroutes_trip_open() {
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        cb.record_reroute().await;
        assert_eq!(cb.state().await, BreakerState::Closed);
        cb.record_reroute().await;
        assert_eq!(cb.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn success_resets_consecutive_reroutes() {
        let cb = CircuitBreaker::new("A", fast_config(), Arc::new(crate::metrics_sink::NoopMetricsSink));
        cb.record_reroute().await;
        cb.record_success().await;
        cb.record_reroute().await;
        assert_eq!(cb.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn state_transitions_publish_to_metrics_sink() {
        let sink = Arc::new(RecordingSink::default());
        let cb = CircuitBreaker::new("A", fast_config(), sink.clone());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        cb.dispatch_attempt().await;
        cb.record_success().await;

        let observed = sink.states.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                ("A".to_string(), BreakerState::Open),
                ("A".to_string(), BreakerState::HalfOpen),
                ("A".to_string(), BreakerState::Closed),
            ]
        );
    }
}
