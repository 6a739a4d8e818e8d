//! Periodic liveness probing of every known instance, exposed as a boolean
//! view keyed by `(service_type, instance)`.
//!
//! The view is a [`dashmap::DashMap`] rather than something behind a single
//! lock: writers (this monitor) and readers (the selector, the status
//! endpoint) must never block each other, which rules out a coarse
//! `Mutex<HashMap>` for this kind of hot concurrent cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::metrics_sink::MetricsSink;
use crate::registry::RegistryClient;

/// `(service_type, instance)` -> last observed liveness.
type HealthKey = (String, String);

pub struct HealthMonitor {
    view: DashMap<HealthKey, bool>,
    http: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(probe_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .expect("health probe client builds with a fixed timeout");
        let (shutdown, _) = watch::channel(false);
        Self {
            view: DashMap::new(),
            http,
            shutdown,
        }
    }

    /// An instance with no recorded probe result is treated as unhealthy.
    pub fn is_healthy(&self, service_type: &str, instance: &str) -> bool {
        self.view
            .get(&(service_type.to_string(), instance.to_string()))
            .map(|entry| *entry)
            .unwrap_or(false)
    }

    pub fn snapshot_for(&self, service_type: &str, instances: &[String]) -> Vec<(String, bool)> {
        instances
            .iter()
            .map(|instance| (instance.clone(), self.is_healthy(service_type, instance)))
            .collect()
    }

    /// Spawns the periodic probing loop. Cancelled at the next tick or
    /// in-flight-probe suspension point once the returned handle is dropped
    /// or `shutdown()` is called.
    pub fn spawn(
        self: &Arc<Self>,
        registry: Arc<RegistryClient>,
        service_types: Vec<String>,
        interval: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor
                            .run_cycle(&registry, &service_types, &metrics)
                            .await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("health monitor shutting down");
                        return;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn run_cycle(
        &self,
        registry: &RegistryClient,
        service_types: &[String],
        metrics: &Arc<dyn MetricsSink>,
    ) {
        let mut targets: HashSet<HealthKey> = HashSet::new();
        for service_type in service_types {
            for instance in registry.list_instances(service_type).await {
                targets.insert((service_type.clone(), instance));
            }
        }

        let probes = targets.into_iter().map(|(service_type, instance)| {
            let http = self.http.clone();
            async move {
                let healthy = probe_once(&http, &instance).await;
                (service_type, instance, healthy)
            }
        });

        let results = futures::future::join_all(probes).await;
        for (service_type, instance, healthy) in results {
            self.view.insert((service_type.clone(), instance.clone()), healthy);
            metrics.set_service_health(&service_type, &instance, healthy);
        }
    }
}

async fn probe_once(http: &reqwest::Client, instance: &str) -> bool {
    let url = format!("http://{instance}/ping");
    match http.get(&url).send().await {
        Ok(resp) => resp.status() == reqwest::StatusCode::OK,
        Err(err) => {
            tracing::debug!(instance, error = %err, "health probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_instance_is_unhealthy() {
        let monitor = HealthMonitor::new(Duration::from_millis(100));
        assert!(!monitor.is_healthy("A", "10.0.0.1"));
    }

    #[tokio::test]
    async fn probe_against_unreachable_instance_is_unhealthy() {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        assert!(!probe_once(&http, "127.0.0.1:1").await);
    }

    #[tokio::test]
    async fn probe_against_mock_instance_returning_200_is_healthy() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/ping"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let address = server.address().to_string();
        assert!(probe_once(&http, &address).await);
    }

    #[tokio::test]
    async fn probe_against_mock_instance_returning_503_is_unhealthy() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/ping"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let address = server.address().to_string();
        assert!(!probe_once(&http, &address).await);
    }
}
