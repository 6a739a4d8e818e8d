//! On-demand per-instance load scraping with a freshness-bounded view.
//!
//! Unlike [`crate::health`], which has a single writer (the background
//! monitor), `serviceLoads` is written by whichever selector call samples a
//! given instance — concurrent selections for different requests may race to
//! write the same key. `DashMap`'s per-shard locking makes that safe without
//! a coarser lock around the whole map.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;

type LoadKey = (String, String);

/// A freshness-stamped load reading for one instance.
#[derive(Debug, Clone, Copy)]
pub struct LoadSample {
    pub requests_per_second: f64,
    pub sampled_at: Instant,
}

impl LoadSample {
    /// Samples older than one selection cycle are "load unknown".
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.sampled_at.elapsed() <= max_age
    }
}

#[derive(Debug, Deserialize)]
struct MetricsBody {
    #[serde(rename = "requestsPerSecond")]
    requests_per_second: f64,
}

pub struct LoadSampler {
    view: DashMap<LoadKey, LoadSample>,
    http: reqwest::Client,
    backend_port: u16,
    critical_load_threshold: f64,
}

impl LoadSampler {
    pub fn new(probe_timeout: Duration, backend_port: u16, critical_load_threshold: f64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .expect("load sampler client builds with a fixed timeout");
        Self {
            view: DashMap::new(),
            http,
            backend_port,
            critical_load_threshold,
        }
    }

    pub fn shared(
        probe_timeout: Duration,
        backend_port: u16,
        critical_load_threshold: f64,
    ) -> Arc<Self> {
        Arc::new(Self::new(probe_timeout, backend_port, critical_load_threshold))
    }

    /// Returns the last known sample without refreshing it (selection-cycle
    /// reads after `sample_load` has already populated the map).
    pub fn last_sample(&self, service_type: &str, instance: &str) -> Option<LoadSample> {
        self.view
            .get(&(service_type.to_string(), instance.to_string()))
            .map(|entry| *entry)
    }

    /// Scrapes `GET http://<instance>:<backend_port>/metrics`. On success,
    /// updates the in-memory entry and returns it; on failure returns `None`
    /// and the caller treats load as unknown.
    pub async fn sample_load(&self, service_type: &str, instance: &str) -> Option<LoadSample> {
        let url = format!("http://{instance}:{}/metrics", self.backend_port);
        let body = match self.http.get(&url).send().await {
            Ok(resp) => match resp.json::<MetricsBody>().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::debug!(instance, error = %err, "load sample body unparseable");
                    return None;
                }
            },
            Err(err) => {
                tracing::debug!(instance, error = %err, "load sample request failed");
                return None;
            }
        };

        if body.requests_per_second > self.critical_load_threshold {
            tracing::warn!(
                instance,
                requests_per_second = body.requests_per_second,
                threshold = self.critical_load_threshold,
                "instance load above critical threshold"
            );
        }

        let sample = LoadSample {
            requests_per_second: body.requests_per_second,
            sampled_at: Instant::now(),
        };
        self.view
            .insert((service_type.to_string(), instance.to_string()), sample);
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_sample_within_max_age() {
        let sample = LoadSample {
            requests_per_second: 10.0,
            sampled_at: Instant::now(),
        };
        assert!(sample.is_fresh(Duration::from_secs(30)));
    }

    #[test]
    fn unknown_instance_has_no_last_sample() {
        let sampler = LoadSampler::new(Duration::from_millis(100), 5000, 60.0);
        assert!(sampler.last_sample("A", "10.0.0.1").is_none());
    }

    #[tokio::test]
    async fn unreachable_instance_samples_to_none() {
        let sampler = LoadSampler::new(Duration::from_millis(100), 5000, 60.0);
        assert!(sampler.sample_load("A", "127.0.0.1:1").await.is_none());
    }

    #[tokio::test]
    async fn sample_load_parses_mock_metrics_response() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/metrics"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "requestsPerSecond": 12.5 })),
            )
            .mount(&server)
            .await;

        let host = server.address().ip().to_string();
        let sampler = LoadSampler::new(Duration::from_millis(500), server.address().port(), 60.0);
        let sample = sampler.sample_load("A", &host).await.unwrap();
        assert_eq!(sample.requests_per_second, 12.5);
        assert_eq!(sampler.last_sample("A", &host).unwrap().requests_per_second, 12.5);
    }

    #[tokio::test]
    async fn sample_load_above_threshold_still_returns_sample() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/metrics"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "requestsPerSecond": 90.0 })),
            )
            .mount(&server)
            .await;

        let host = server.address().ip().to_string();
        let sampler = LoadSampler::new(Duration::from_millis(500), server.address().port(), 60.0);
        let sample = sampler.sample_load("A", &host).await.unwrap();
        assert_eq!(sample.requests_per_second, 90.0);
    }
}
