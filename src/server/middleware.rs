use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;

use super::handlers::ErrorResponse;
use super::AppState;
use crate::crypto::constant_time_eq;

/// Admin key authentication for the management routes.
///
/// Open when no admin key is configured.
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.settings.admin_api_key.as_deref() else {
        return next.run(request).await;
    };

    let authorized = match &bearer {
        Some(TypedHeader(Authorization(bearer))) => {
            constant_time_eq(bearer.token().as_bytes(), expected.as_bytes())
        }
        None => false,
    };

    if !authorized {
        tracing::warn!(
            path = %request.uri().path(),
            has_token = bearer.is_some(),
            "Rejected management request"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Invalid or missing API key")),
        )
            .into_response();
    }

    next.run(request).await
}
