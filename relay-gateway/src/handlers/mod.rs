//! # Request Handlers
//!
//! Four handlers make up the entire gateway surface:
//!
//! - [`ping`]: aggregated health status, memoized for 10 seconds.
//! - [`metrics`]: the Prometheus registry in text exposition format.
//! - [`register`]: appends an instance to a service type's registry list.
//! - [`forward`]: the router state machine — admission, breaker gate,
//!   selection, forward, outcome accounting — wired as the catch-all
//!   fallback for every other path.

use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::breaker::{BreakerState, DispatchDecision};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::gateway_error::GatewayError;
use crate::server::AppState;

/// Headers that describe one hop of the connection and must never be
/// forwarded verbatim, per RFC 7230 §6.1.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || lower.starts_with("proxy-") {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// `GET /ping`: aggregated gateway and per-service health.
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    {
        let cache = state.ping_cache.read().await;
        if let Some((stamped_at, body)) = cache.as_ref() {
            if stamped_at.elapsed() < crate::server::PING_CACHE_WINDOW {
                return (StatusCode::OK, Json(body.clone()));
            }
        }
    }

    let mut services = serde_json::Map::new();
    for service_type in &state.config.service_types {
        let instances = state.registry.list_instances(service_type).await;
        let breaker_state = match state.breaker_for(service_type) {
            Some(breaker) => breaker.state().await,
            None => BreakerState::Closed,
        };
        let health_status: Vec<Value> = state
            .health
            .snapshot_for(service_type, &instances)
            .into_iter()
            .map(|(ip, healthy)| {
                json!({
                    "ip": ip,
                    "status": if healthy { "healthy" } else { "unhealthy" },
                })
            })
            .collect();

        services.insert(
            format!("service{service_type}"),
            json!({
                "instances": instances.len(),
                "circuitBreakerState": breaker_state.as_str(),
                "healthStatus": health_status,
            }),
        );
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let body = json!({
        "status": if state.registry.is_connected() { "healthy" } else { "unhealthy" },
        "timestamp": timestamp,
        "gateway": {
            "port": state.config.server.port,
            "concurrentRequests": state.admission.current(),
            "maxConcurrentRequests": state.admission.max_concurrent(),
            "redisConnected": state.registry.is_connected(),
        },
        "services": Value::Object(services),
    });

    *state.ping_cache.write().await = Some((Instant::now(), body.clone()));
    (StatusCode::OK, Json(body))
}

/// `GET /metrics`: Prometheus text exposition. Never gated by the admission
/// limiter.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    host: Option<String>,
    #[serde(rename = "serviceType")]
    service_type: Option<String>,
}

/// `POST /<prefix>/register`: `{ host, serviceType }` -> `{"status":"registered"}`.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<Value>, GatewayError> {
    let host = body
        .host
        .filter(|h| !h.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("missing field: host".to_string()))?;
    let service_type = body
        .service_type
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("missing field: serviceType".to_string()))?;

    state
        .registry
        .register_instance(&service_type, &host)
        .await?;

    Ok(Json(json!({ "status": "registered" })))
}

/// The router state machine: admission guard, breaker gate, instance
/// selection, forward, and outcome accounting. Wired as the router's
/// fallback so it catches every path not claimed by `/ping`, `/metrics`, or
/// a `/register` route.
pub async fn forward(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let Some(service_type) = state.config.service_type_for_path(&path).map(str::to_string) else {
        return GatewayError::BadRequest(format!("no service routed for path {path}"))
            .into_response();
    };

    let Some(_guard) = state.admission.try_acquire() else {
        return GatewayError::AdmissionRejected.into_response();
    };
    state
        .metrics
        .set_active_connections(state.admission.current() as i64);

    let Some(breaker) = state.breaker_for(&service_type) else {
        return GatewayError::Internal(format!("no breaker configured for {service_type}"))
            .into_response();
    };

    let state_before = breaker.state().await;
    let decision = breaker.dispatch_attempt().await;
    if decision == DispatchDecision::Reject {
        return GatewayError::BreakerOpen(service_type).into_response();
    }
    if state_before == BreakerState::Open {
        // The gate just consumed the OPEN->HALF_OPEN transition: this
        // forward is the probe, i.e. a reroute.
        breaker.record_reroute().await;
    }

    let Some(instance) = state.selector.select(&service_type).await else {
        return GatewayError::NoInstances(service_type).into_response();
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return GatewayError::BadRequest(format!("failed to read request body: {err}"))
                .into_response();
        }
    };

    let url = format!(
        "http://{instance}:{}{}",
        state.config.backend.rest_port,
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(path.as_str())
    );

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut outbound = state.forward_client.request(method, &url).body(body_bytes);

    for (name, value) in strip_hop_by_hop(&parts.headers).iter() {
        outbound = outbound.header(name.clone(), value.clone());
    }
    outbound = outbound.header("X-Gateway-Token", state.config.gateway_secret.clone());

    match outbound.send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_server_error() {
                breaker.record_failure().await;
            } else {
                breaker.record_success().await;
            }

            let axum_status =
                StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            // reqwest re-exports the same `http::HeaderMap` axum uses, so no
            // conversion is needed between the two.
            let response_headers = strip_hop_by_hop(resp.headers());
            let response_body = resp.bytes().await.unwrap_or_default();

            let mut builder = Response::builder().status(axum_status);
            if let Some(headers) = builder.headers_mut() {
                *headers = response_headers;
            }
            builder.body(Body::from(response_body)).unwrap_or_else(|_| {
                GatewayError::Internal("failed to build response".to_string()).into_response()
            })
        }
        Err(err) => {
            breaker.record_failure().await;
            if err.is_timeout() {
                GatewayError::UpstreamTimeout.into_response()
            } else if let Some(status) = err.status() {
                let axum_status =
                    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
                (axum_status, Json(json!({ "detail": err.to_string() }))).into_response()
            } else {
                GatewayError::UpstreamTransportError(err.to_string()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("x-custom", "value".parse().unwrap());
        let stripped = strip_hop_by_hop(&headers);
        assert!(!stripped.contains_key("connection"));
        assert!(stripped.contains_key("x-custom"));
    }

    #[test]
    fn register_request_rejects_empty_host() {
        let body = RegisterRequest {
            host: Some(String::new()),
            service_type: Some("A".to_string()),
        };
        assert!(body.host.filter(|h| !h.is_empty()).is_none());
    }
}
