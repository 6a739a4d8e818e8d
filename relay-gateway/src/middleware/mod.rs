//! # HTTP Middleware Module
//!
//! Two layers wrap every request: [`logging_middleware`] attaches a
//! [`RequestContext`](crate::request_context::RequestContext) and logs
//! method/path/status/latency, and [`metrics_middleware`] records the same
//! latency into the `http_request_duration_seconds` histogram. Authentication,
//! CORS, and body-validation middleware are out of scope for this gateway —
//! it forwards a single shared secret rather than making authorization
//! decisions.

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

use crate::request_context::RequestContext;
use crate::server::AppState;

pub async fn logging_middleware(
    State(_state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let context = RequestContext::new();
    let request_id = context.request_id.clone();
    req.extensions_mut().insert(context);

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis(),
        "request processed"
    );

    response
}

pub async fn metrics_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let seconds = start.elapsed().as_secs_f64();

    state
        .metrics
        .observe_request(&method, &route, response.status().as_u16(), seconds);
    state
        .metrics
        .set_active_connections(state.admission.current() as i64);

    response
}
