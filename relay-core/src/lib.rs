//! # Relay Core
//!
//! The request-path core of the gateway: dynamic instance discovery against a
//! shared registry, continuous health monitoring, on-demand load sampling, a
//! per-service circuit breaker, and the selector that combines all three into
//! a single routing decision.
//!
//! The gateway binary crate owns bootstrap, HTTP wiring, and configuration;
//! this crate owns the components that make up the 70% of the system that is
//! the actual engineering problem.
//!
//! ## Modules
//!
//! - [`registry`]: typed read/write access to the shared instance registry.
//! - [`health`]: periodic liveness probing, exposed as a boolean view.
//! - [`load`]: on-demand load scraping with a freshness-bounded view.
//! - [`breaker`]: the per-service-type circuit breaker state machine.
//! - [`selector`]: combines the above into a single instance choice.
//! - [`admission`]: the process-wide concurrency admission limiter.
//! - [`metrics_sink`]: the trait the gateway's metrics registry implements so
//!   that these components can publish gauges/histograms without this crate
//!   depending on a specific metrics backend.
//! - [`duration_serde`]: human-readable duration (de)serialization, used by
//!   configuration types that live in the gateway crate.

pub mod admission;
pub mod breaker;
pub mod duration_serde;
pub mod error;
pub mod health;
pub mod load;
pub mod metrics_sink;
pub mod registry;
pub mod selector;

pub use admission::{AdmissionGuard, AdmissionLimiter};
pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, DispatchDecision};
pub use error::CoreError;
pub use health::HealthMonitor;
pub use load::{LoadSample, LoadSampler};
pub use metrics_sink::{MetricsSink, NoopMetricsSink};
pub use registry::RegistryClient;
pub use selector::Selector;
