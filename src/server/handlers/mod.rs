pub mod oauth;
pub mod subscriptions;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::server::AppState;
use crate::webhook::IngestError;

/// Liveness check
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: crate::APP_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sandbox: state.settings.sandbox_mode,
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    service: String,
    version: String,
    sandbox: bool,
}

/// Readiness check: the event store must answer
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let (code, status, database) = match state.db.ping() {
        Ok(()) => (StatusCode::OK, "ready", "ok"),
        Err(e) => {
            tracing::error!("Readiness check failed: {:#}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "not_ready", "unavailable")
        }
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "checks": { "database": database },
        })),
    )
        .into_response()
}

/// Standard error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Errors the management endpoints answer with
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Request failed: {:#}", err);
        ApiError::Internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::InvalidSignature | IngestError::StaleTimestamp => StatusCode::UNAUTHORIZED,
            IngestError::MalformedPayload(_) | IngestError::MissingEventType => {
                StatusCode::BAD_REQUEST
            }
            IngestError::Storage(e) => {
                tracing::error!("Webhook storage failed: {:#}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ApiError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_ingest_error_status_codes() {
        let cases = [
            (IngestError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (IngestError::StaleTimestamp, StatusCode::UNAUTHORIZED),
            (IngestError::MalformedPayload("eof".into()), StatusCode::BAD_REQUEST),
            (IngestError::MissingEventType, StatusCode::BAD_REQUEST),
            (
                IngestError::Storage(anyhow::anyhow!("disk full")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
