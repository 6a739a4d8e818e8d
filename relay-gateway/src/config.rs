//! # Configuration Management Module
//!
//! Gateway configuration: load from an optional TOML file, apply environment
//! variable overrides, then validate. Environment variables always win over
//! the file, and the file's absence falls back to [`Config::default`] rather
//! than failing startup.

use std::env;
use std::time::Duration;

use relay_core::breaker::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};

use relay_core::duration_serde;

/// One route prefix bound to a service type, e.g. `/sA` -> `A`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePrefix {
    pub prefix: String,
    pub service_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub redis_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub rest_port: u16,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rest_port: 5000,
            request_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub max_concurrent_requests: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub critical_load_threshold: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            critical_load_threshold: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub backend: BackendConfig,
    pub admission: AdmissionConfig,
    pub breaker: CircuitBreakerConfig,
    pub load: LoadConfig,
    pub health: HealthConfig,
    /// Recognized service types, fixed at startup.
    pub service_types: Vec<String>,
    /// Inbound path prefix -> service type bindings.
    pub routes: Vec<RoutePrefix>,
    /// Shared secret forwarded as `X-Gateway-Token`.
    pub gateway_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            registry: RegistryConfig::default(),
            backend: BackendConfig::default(),
            admission: AdmissionConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            load: LoadConfig::default(),
            health: HealthConfig::default(),
            service_types: vec!["A".to_string(), "B".to_string()],
            routes: vec![
                RoutePrefix {
                    prefix: "/sA".to_string(),
                    service_type: "A".to_string(),
                },
                RoutePrefix {
                    prefix: "/sB".to_string(),
                    service_type: "B".to_string(),
                },
            ],
            gateway_secret: "test123".to_string(),
        }
    }
}

impl Config {
    /// Loads from `path` if it exists; a missing file is not fatal and falls
    /// back to [`Config::default`]. Env overrides always apply on top.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(err) => {
                tracing::warn!(path, error = %err, "config file not found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(port) = env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid PORT: {port}"))?;
        }

        if let Ok(url) = env::var("SM_REDIS_URL") {
            self.registry.redis_url = url;
        }

        if let Ok(port) = env::var("SERV_REST_PORT") {
            self.backend.rest_port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid SERV_REST_PORT: {port}"))?;
        }

        if let Ok(ms) = env::var("SERVER_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid SERVER_TIMEOUT_MS: {ms}"))?;
            self.backend.request_timeout = Duration::from_millis(ms);
        }

        if let Ok(max) = env::var("MAX_CONCURRENT_REQUESTS") {
            self.admission.max_concurrent_requests = max
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid MAX_CONCURRENT_REQUESTS: {max}"))?;
        }

        if let Ok(threshold) = env::var("ERROR_THRESHOLD") {
            self.breaker.error_threshold = threshold
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid ERROR_THRESHOLD: {threshold}"))?;
        }

        if let Ok(ms) = env::var("ERROR_TIMEOUT") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid ERROR_TIMEOUT: {ms}"))?;
            self.breaker.error_timeout = Duration::from_millis(ms);
        }

        if let Ok(threshold) = env::var("CRITICAL_LOAD_THRESHOLD") {
            self.load.critical_load_threshold = threshold
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CRITICAL_LOAD_THRESHOLD: {threshold}"))?;
        }

        if let Ok(threshold) = env::var("REROUTE_THRESHOLD") {
            self.breaker.reroute_threshold = threshold
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid REROUTE_THRESHOLD: {threshold}"))?;
        }

        if let Ok(secret) = env::var("GATEWAY_SECRET") {
            if !secret.is_empty() {
                self.gateway_secret = secret;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be non-zero"));
        }
        if self.backend.rest_port == 0 {
            return Err(anyhow::anyhow!("backend rest_port must be non-zero"));
        }
        if self.backend.request_timeout.is_zero() {
            return Err(anyhow::anyhow!("backend request_timeout must be > 0"));
        }
        if self.admission.max_concurrent_requests == 0 {
            return Err(anyhow::anyhow!("max_concurrent_requests must be > 0"));
        }
        if self.breaker.error_threshold == 0 {
            return Err(anyhow::anyhow!("breaker error_threshold must be > 0"));
        }
        if self.breaker.reroute_threshold == 0 {
            return Err(anyhow::anyhow!("breaker reroute_threshold must be > 0"));
        }
        if self.gateway_secret.is_empty() {
            return Err(anyhow::anyhow!("gateway_secret must not be empty"));
        }
        if self.service_types.is_empty() {
            return Err(anyhow::anyhow!("at least one service type must be configured"));
        }
        for route in &self.routes {
            if !self.service_types.contains(&route.service_type) {
                return Err(anyhow::anyhow!(
                    "route {} is bound to unknown service type {}",
                    route.prefix,
                    route.service_type
                ));
            }
        }
        Ok(())
    }

    /// Looks up the service type bound to an inbound path, longest-prefix-first.
    pub fn service_type_for_path(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .filter(|route| path.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len())
            .map(|route| route.service_type.as_str())
    }
}
