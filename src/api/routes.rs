use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::gateway::{Gateway, GatewayError};
use crate::resilience::CircuitBreakerManager;

use super::request::{DecisionBody, ExportParams, ReplayParams};
use super::response::{ErrorResponse, HealthResponse, ReadyResponse};

/// Header carrying the API credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<Gateway>,

    /// Breakers for every downstream dependency
    pub breakers: Arc<CircuitBreakerManager>,

    /// Application start time
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/decision", post(handle_decision))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .route("/metrics", get(handle_metrics))
        .route("/v1/audit/verify", get(handle_audit_verify))
        .route("/v1/audit/export", get(handle_audit_export))
        .route("/v1/dead-letter/:target/replay", post(handle_replay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

fn header_credential(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Admin routes accept only the header credential.
fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let credential = header_credential(headers).unwrap_or_default();
    if state.gateway.authorize(credential) {
        return Ok(());
    }

    state.gateway.metrics().record_auth_failure();
    warn!("Rejected admin request");
    Err(error_response(StatusCode::UNAUTHORIZED, ErrorResponse::unauthorized()))
}

/// Handle decision requests.
async fn handle_decision(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed decision request");
            return error_response(StatusCode::BAD_REQUEST, ErrorResponse::bad_request());
        }
    };

    let req = body.into_request(header_credential(&headers));
    let gateway = state.gateway.clone();

    // Audit append does blocking file IO
    match tokio::task::spawn_blocking(move || gateway.check(req)).await {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(GatewayError::Validation(reason))) => {
            warn!(reason = %reason, "Invalid decision request");
            error_response(StatusCode::BAD_REQUEST, ErrorResponse::bad_request())
        }
        Ok(Err(GatewayError::Unauthorized)) => {
            error_response(StatusCode::UNAUTHORIZED, ErrorResponse::unauthorized())
        }
        Ok(Err(GatewayError::Storage(_))) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
        Err(e) => {
            error!(error = %e, "Decision task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
    }
}

/// Health check endpoint.
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ruleset = state.gateway.engine().ruleset();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        policy_version: ruleset.policy_version.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        shadow_mode: state.gateway.engine().shadow().enabled,
        breakers: state.breakers.snapshot(),
    })
}

/// Readiness check endpoint.
async fn handle_ready(State(state): State<Arc<AppState>>) -> Response {
    let ruleset = state.gateway.engine().ruleset();

    if ruleset.is_empty() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("No rules loaded", "NOT_READY"),
        );
    }

    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            policy_version: ruleset.policy_version.clone(),
            rules: ruleset.len(),
        }),
    )
        .into_response()
}

/// Metrics endpoint (Prometheus format).
async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ruleset = state.gateway.engine().ruleset();
    let telemetry = state.gateway.telemetry().snapshot();

    let mut metrics = state.gateway.metrics().to_prometheus();
    metrics.push_str(&format!(
        r#"
# HELP policygate_uptime_seconds Application uptime in seconds
# TYPE policygate_uptime_seconds counter
policygate_uptime_seconds {}

# HELP policygate_rules Number of rules loaded
# TYPE policygate_rules gauge
policygate_rules {}

# HELP policygate_audit_records Records in the audit chain
# TYPE policygate_audit_records gauge
policygate_audit_records {}

# HELP policygate_telemetry_pending Events waiting for the next flush
# TYPE policygate_telemetry_pending gauge
policygate_telemetry_pending {}
"#,
        state.start_time.elapsed().as_secs(),
        ruleset.len(),
        state.gateway.audit().len(),
        telemetry.pending,
    ));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Walk the audit chain from genesis.
async fn handle_audit_verify(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(rejected) = require_api_key(&state, &headers) {
        return rejected;
    }

    let audit = state.gateway.audit().clone();
    match tokio::task::spawn_blocking(move || audit.verify()).await {
        Ok(Ok(report)) => {
            if !report.valid {
                warn!(break_point = ?report.break_point, "Audit chain verification failed");
            }
            (StatusCode::OK, Json(report)).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "Audit verification could not run");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
        Err(e) => {
            error!(error = %e, "Audit verification task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
    }
}

/// Export filtered records with a fresh verification result.
async fn handle_audit_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ExportParams>,
) -> Response {
    if let Err(rejected) = require_api_key(&state, &headers) {
        return rejected;
    }

    let Some(format) = params.format() else {
        return error_response(StatusCode::BAD_REQUEST, ErrorResponse::bad_request());
    };
    let filter = params.to_filter();

    let audit = state.gateway.audit().clone();
    match tokio::task::spawn_blocking(move || audit.export(&filter, format)).await {
        Ok(Ok(export)) => {
            let valid = if export.verification.valid { "true" } else { "false" };
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
                    (
                        header::HeaderName::from_static("x-audit-chain-valid"),
                        HeaderValue::from_static(valid),
                    ),
                ],
                export.content,
            )
                .into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "Audit export failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
        Err(e) => {
            error!(error = %e, "Audit export task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
    }
}

/// Re-attempt dead-lettered batches for one sink.
async fn handle_replay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(target): Path<String>,
    Query(params): Query<ReplayParams>,
) -> Response {
    if let Err(rejected) = require_api_key(&state, &headers) {
        return rejected;
    }

    match state.gateway.telemetry().replay(&target, params.max).await {
        Ok(Some(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, ErrorResponse::service("NOT_FOUND")),
        Err(e) => {
            error!(target = %target, error = %e, "Dead-letter replay failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal_error())
        }
    }
}
