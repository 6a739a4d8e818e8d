//! # Relay Gateway Library
//!
//! The binary-facing half of the gateway: process bootstrap, HTTP server
//! wiring, configuration, and request handlers. The request-path engineering
//! itself — registry client, health monitor, load sampler, circuit breaker,
//! selector — lives in `relay-core`; this crate is the thin layer that turns
//! those components into an `axum::Router` and a CLI entry point.
//!
//! ## Modules
//!
//! - [`config`]: configuration load/override/validate pipeline.
//! - [`gateway_error`]: the request-facing error enum and its HTTP mapping.
//! - [`metrics`]: the Prometheus registry backing `GET /metrics`.
//! - [`middleware`]: request logging and latency instrumentation.
//! - [`request_context`]: per-request id/timing, threaded through tracing.
//! - [`server`]: `GatewayState`, `AppState`, and `create_server`.
//! - [`handlers`]: the `/ping`, `/metrics`, `/<prefix>/register`, and forward
//!   handlers.

pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod request_context;
pub mod server;

pub use server::{create_server, AppState, GatewayState};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn test_app() -> axum::Router {
        let mut config = config::Config::default();
        config.registry.redis_url = "redis://127.0.0.1:1".to_string();
        create_server(config).await.unwrap()
    }

    #[tokio::test]
    async fn ping_endpoint_reports_unhealthy_without_registry() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_prometheus_text() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unregistered_service_returns_no_instances() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sB/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn register_rejects_missing_field() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sA/register")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_with_valid_body_surfaces_registry_unavailable() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sA/register")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"host":"10.0.0.1","serviceType":"A"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn ping_body_enumerates_every_configured_service() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["services"]["serviceA"].is_object());
        assert!(json["services"]["serviceB"].is_object());
        assert_eq!(json["gateway"]["redisConnected"], false);
    }

    #[tokio::test]
    async fn admission_limit_rejects_request_once_capacity_is_held() {
        let mut config = config::Config::default();
        config.registry.redis_url = "redis://127.0.0.1:1".to_string();
        config.admission.max_concurrent_requests = 1;
        let state = server::build_state(config).await.unwrap();

        // Hold the only admission slot for the duration of the handler call,
        // the way an in-flight request would.
        let _held = state.admission.try_acquire().unwrap();

        let response = handlers::forward(
            axum::extract::State(state.clone()),
            Request::builder()
                .uri("/sA/anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("API Gateway is busy"));
    }
}
