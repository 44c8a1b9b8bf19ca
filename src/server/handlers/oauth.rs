use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::ApiError;
use crate::models::{GrantType, TokenInfo, TokenResponse};
use crate::server::AppState;
use crate::uber::AuthError;

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::warn!("OAuth request failed: {}", err);
        match err {
            AuthError::NotConfigured => ApiError::BadRequest(err.to_string()),
            AuthError::Http(_) | AuthError::Rejected { .. } => ApiError::Upstream(err.to_string()),
            AuthError::Storage(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

/// Obtain a token with any of the supported grants
pub async fn token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let grant = match req.grant_type.as_str() {
        "client_credentials" => GrantType::ClientCredentials,
        "authorization_code" => GrantType::AuthorizationCode,
        "refresh_token" => GrantType::RefreshToken,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unsupported grant type: {}",
                other
            )))
        }
    };

    let token = match grant {
        GrantType::ClientCredentials => state.oauth.client_credentials(req.scope.as_deref()).await?,
        GrantType::AuthorizationCode => {
            let code = required(&req.code, "Authorization code is required")?;
            let redirect_uri = required(&req.redirect_uri, "redirect_uri is required")?;
            state.oauth.exchange_code(code, redirect_uri).await?
        }
        GrantType::RefreshToken => {
            let refresh_token = required(&req.refresh_token, "Refresh token is required")?;
            state.oauth.refresh(refresh_token).await?
        }
    };

    Ok(Json(token))
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
}

pub async fn revoke(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state
        .oauth
        .revoke(&req.token, req.token_type_hint.as_deref())
        .await?
    {
        Ok(Json(serde_json::json!({ "message": "Token revoked successfully" })))
    } else {
        Err(ApiError::BadRequest("Failed to revoke token".to_string()))
    }
}

#[derive(Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

pub async fn introspect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntrospectRequest>,
) -> Result<Json<TokenInfo>, ApiError> {
    Ok(Json(state.oauth.introspect(&req.token).await?))
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub response_type: Option<String>,
}

/// Send the browser to the Uber consent page
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
    if query.response_type.as_deref().unwrap_or("code") != "code" {
        return Err(ApiError::BadRequest(
            "Only the authorization code flow is supported".to_string(),
        ));
    }

    let url = state.oauth.authorize_url(
        &query.redirect_uri,
        query.state.as_deref(),
        query.scope.as_deref(),
    );
    Ok(Redirect::temporary(&url))
}
