use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::DropError;
use crate::state::AppState;

mod admin;
mod drops;
mod webhook;

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let mut router = Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/webhook/funding", post(webhook::funding_notification))
        .merge(drops::router());
    if state.admin_token.is_some() {
        router = router.merge(admin::router());
    }
    router.layer(cors).with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .engine
        .store()
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let response = ReadyResponse {
        status: "ready",
        reconciliation_pending: state.engine.reconciliation().snapshot().len(),
        gallery_cache_entries: state.cache.gallery.entry_count(),
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    reconciliation_pending: usize,
    gallery_cache_entries: u64,
}

/// Compares an `Authorization: Bearer` header against `expected` without
/// short-circuiting on the first differing byte.
pub(crate) fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(presented) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return false;
    };
    let presented = presented.trim().as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        let code = match status {
            StatusCode::BAD_REQUEST => "validation_error",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::SERVICE_UNAVAILABLE => "storage_error",
            _ => "http_error",
        };
        Self {
            status,
            code,
            message,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
    }
}

impl From<DropError> for HttpError {
    fn from(err: DropError) -> Self {
        let status = match &err {
            DropError::Validation(_) => StatusCode::BAD_REQUEST,
            DropError::NotFound => StatusCode::NOT_FOUND,
            DropError::InvalidState { .. }
            | DropError::Expired
            | DropError::AlreadyClaimed
            | DropError::AlreadyReturned
            | DropError::NotFunded
            | DropError::NotYetExpired => StatusCode::CONFLICT,
            DropError::ChallengeRequired | DropError::ChallengeFailed => StatusCode::FORBIDDEN,
            DropError::Gateway(_) => StatusCode::BAD_GATEWAY,
            DropError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            DropError::SettledButNotPersisted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DropError::ReconciliationPending { .. } => StatusCode::LOCKED,
            DropError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, "HTTP error: {}", self.message);
        } else {
            info!(code = self.code, "HTTP error: {}", self.message);
        }
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}
