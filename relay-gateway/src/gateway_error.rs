//! # Gateway Error Types Module
//!
//! The request-facing error enum and its `IntoResponse` mapping. The wire
//! contract is a flat `{"detail": "..."}` body on every error response,
//! matched to the status code fixed for each error kind below.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("registry unavailable")]
    RegistryUnavailable,

    #[error("no available instances for service{0}")]
    NoInstances(String),

    #[error("circuit breaker open for service{0}")]
    BreakerOpen(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("upstream transport error: {0}")]
    UpstreamTransportError(String),

    #[error("admission limiter at capacity")]
    AdmissionRejected,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<relay_core::CoreError> for GatewayError {
    fn from(err: relay_core::CoreError) -> Self {
        match err {
            relay_core::CoreError::RegistryUnavailable => GatewayError::RegistryUnavailable,
        }
    }
}

#[derive(Serialize)]
struct DetailBody<'a> {
    detail: &'a str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            GatewayError::RegistryUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            GatewayError::NoInstances(service_type) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("No available instances for service{service_type}"),
            ),
            GatewayError::BreakerOpen(service_type) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!(
                    "service{service_type} is currently unavailable (Circuit Breaker: OPEN)"
                ),
            ),
            GatewayError::UpstreamTimeout => {
                (StatusCode::GATEWAY_TIMEOUT, "Request timed out".to_string())
            }
            GatewayError::UpstreamTransportError(detail) => {
                (StatusCode::INTERNAL_SERVER_ERROR, detail.clone())
            }
            GatewayError::AdmissionRejected => (
                StatusCode::SERVICE_UNAVAILABLE,
                "API Gateway is busy. Please try again later.".to_string(),
            ),
            GatewayError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            GatewayError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail.clone()),
        };

        tracing::warn!(status = %status, detail, "request failed");
        (status, Json(DetailBody { detail: &detail })).into_response()
    }
}
