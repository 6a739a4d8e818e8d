//! # Request Context Module
//!
//! A per-request identifier and start time, attached as an Axum extension so
//! `logging_middleware` and the forward handler can correlate their log
//! lines without threading a parameter through every function.

use std::time::Instant;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
