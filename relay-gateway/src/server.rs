//! # HTTP Server Module
//!
//! Server bootstrap: builds every long-lived component (registry client,
//! health monitor, load sampler, one circuit breaker per configured service
//! type, the admission limiter, the Prometheus metrics registry, and the
//! selector that ties them together), spawns the health monitor's background
//! polling task, and wires the `axum::Router`.
//!
//! `GatewayState` is the "single long-lived aggregate" the routing design
//! calls for: handlers borrow it through `axum::extract::State`, never through
//! a module-level singleton.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use relay_core::breaker::CircuitBreaker;
use relay_core::health::HealthMonitor;
use relay_core::load::LoadSampler;
use relay_core::metrics_sink::MetricsSink;
use relay_core::registry::RegistryClient;
use relay_core::selector::Selector;
use relay_core::AdmissionLimiter;
use serde_json::Value;
use tokio::sync::RwLock as AsyncRwLock;

use crate::config::Config;
use crate::handlers;
use crate::metrics::GatewayMetrics;
use crate::middleware::{logging_middleware, metrics_middleware};

/// Process-wide aggregate of every core component plus the pieces the
/// gateway binary owns on top of `relay-core`: the per-service breaker map,
/// the forwarding HTTP client, and the `/ping` memoization cache.
pub struct GatewayState {
    pub config: Config,
    pub registry: Arc<RegistryClient>,
    pub health: Arc<HealthMonitor>,
    pub load: Arc<LoadSampler>,
    pub breakers: DashMap<String, Arc<CircuitBreaker>>,
    pub admission: AdmissionLimiter,
    pub metrics: Arc<GatewayMetrics>,
    pub selector: Arc<Selector>,
    pub forward_client: reqwest::Client,
    pub ping_cache: AsyncRwLock<Option<(Instant, Value)>>,
}

impl GatewayState {
    pub fn breaker_for(&self, service_type: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service_type).map(|entry| entry.clone())
    }
}

/// `axum::State` handle shared across handlers. A plain `Arc` alias rather
/// than a hand-rolled `Clone` impl over several individually-`Arc`'d fields,
/// since every field handlers need is already reached through one `Arc`.
pub type AppState = Arc<GatewayState>;

const PING_MEMOIZATION_WINDOW: Duration = Duration::from_secs(10);

/// Builds every long-lived component without wiring the router, so tests can
/// drive handlers directly against a known `AppState`.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let registry = Arc::new(RegistryClient::new(&config.registry.redis_url));
    let health = Arc::new(HealthMonitor::new(config.backend.request_timeout));
    let load = Arc::new(LoadSampler::new(
        config.backend.request_timeout,
        config.backend.rest_port,
        config.load.critical_load_threshold,
    ));
    let metrics = GatewayMetrics::shared();

    let breakers = DashMap::new();
    for service_type in &config.service_types {
        breakers.insert(
            service_type.clone(),
            CircuitBreaker::shared(
                service_type.clone(),
                config.breaker.clone(),
                metrics.clone() as Arc<dyn MetricsSink>,
            ),
        );
    }

    let selector = Arc::new(Selector::new(
        registry.clone(),
        health.clone(),
        load.clone(),
        config.health.interval,
    ));

    let forward_client = reqwest::Client::builder()
        .timeout(config.backend.request_timeout)
        .build()?;

    let admission = AdmissionLimiter::new(config.admission.max_concurrent_requests);

    health.spawn(
        registry.clone(),
        config.service_types.clone(),
        config.health.interval,
        metrics.clone() as Arc<dyn MetricsSink>,
    );

    Ok(Arc::new(GatewayState {
        config,
        registry,
        health,
        load,
        breakers,
        admission,
        metrics,
        selector,
        forward_client,
        ping_cache: AsyncRwLock::new(None),
    }))
}

pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let state = build_state(config.clone()).await?;

    let mut app = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/metrics", get(handlers::metrics));

    for route in &config.routes {
        app = app.route(&format!("{}/register", route.prefix), post(handlers::register));
    }

    let app = app
        .fallback(handlers::forward)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            logging_middleware,
        ))
        .with_state(state);

    Ok(app)
}

pub(crate) const PING_CACHE_WINDOW: Duration = PING_MEMOIZATION_WINDOW;
