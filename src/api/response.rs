use serde::Serialize;

use crate::resilience::CircuitSnapshot;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub policy_version: String,
    pub uptime_secs: u64,
    pub shadow_mode: bool,
    pub breakers: Vec<CircuitSnapshot>,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub policy_version: String,
    pub rules: usize,
}

/// Error response. Never carries diagnostic detail.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn service(code: impl Into<String>) -> Self {
        ErrorResponse::new("service error", code)
    }

    pub fn bad_request() -> Self {
        ErrorResponse::service("BAD_REQUEST")
    }

    pub fn unauthorized() -> Self {
        ErrorResponse::service("UNAUTHORIZED")
    }

    pub fn internal_error() -> Self {
        ErrorResponse::service("INTERNAL_ERROR")
    }
}
