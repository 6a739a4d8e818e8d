//! Error types shared by the core routing components.
//!
//! These are the error *kinds* the request path can produce before they are
//! turned into an HTTP response by the gateway binary; the core crate itself
//! never serializes a response body. `NoInstances`, `BreakerOpen`, and
//! `AdmissionRejected` are gateway-level outcomes (no-instance / breaker-gate
//! / admission-limiter decisions made by the router itself, not by a
//! fallible call into this crate) and so live only on `GatewayError`; this
//! enum carries only the error the registry client can actually raise.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("registry unavailable")]
    RegistryUnavailable,
}
