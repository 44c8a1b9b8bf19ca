use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::ApiError;
use crate::server::AppState;
use crate::uber::{SubscriptionUpdate, WebhookSubscription};
use crate::webhook::WebhookEventType;

fn upstream(err: anyhow::Error) -> ApiError {
    tracing::warn!("Uber Eats subscription call failed: {:#}", err);
    ApiError::Upstream(format!("{:#}", err))
}

fn validate_url(raw: &str) -> Result<(), ApiError> {
    match url::Url::parse(raw) {
        Ok(u) if u.scheme() == "https" || u.scheme() == "http" => Ok(()),
        Ok(u) => Err(ApiError::BadRequest(format!(
            "Invalid URL scheme: {}",
            u.scheme()
        ))),
        Err(e) => Err(ApiError::BadRequest(format!("Invalid URL: {}", e))),
    }
}

/// Our own ingress endpoint as seen from outside
fn ingress_url(state: &AppState) -> String {
    format!(
        "{}/{}/webhooks",
        state.settings.public_url.trim_end_matches('/'),
        crate::API_VERSION
    )
}

pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WebhookSubscription>>, ApiError> {
    Ok(Json(state.uber.list_webhooks().await.map_err(upstream)?))
}

#[derive(Deserialize, Default)]
pub struct CreateSubscriptionRequest {
    /// Defaults to this server's ingress endpoint
    pub url: Option<String>,
    /// Defaults to every known event type
    pub events: Option<Vec<WebhookEventType>>,
}

pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<WebhookSubscription>, ApiError> {
    let url = req.url.unwrap_or_else(|| ingress_url(&state));
    validate_url(&url)?;

    let events = match req.events {
        Some(events) if !events.is_empty() => events,
        _ => WebhookEventType::ALL.to_vec(),
    };

    let subscription = state
        .uber
        .configure_webhook(&url, &events)
        .await
        .map_err(upstream)?;

    tracing::info!(id = %subscription.id, url = %url, events = events.len(), "Webhook subscription created");
    Ok(Json(subscription))
}

pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<SubscriptionUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(url) = &update.url {
        validate_url(url)?;
    }

    state
        .uber
        .update_webhook(&id, &update)
        .await
        .map_err(upstream)?;

    tracing::info!(id = %id, "Webhook subscription updated");
    Ok(Json(serde_json::json!({ "message": "Subscription updated", "id": id })))
}

pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.uber.delete_webhook(&id).await.map_err(upstream)?;

    tracing::info!(id = %id, "Webhook subscription deleted");
    Ok(Json(serde_json::json!({ "message": "Subscription deleted", "id": id })))
}

#[derive(Deserialize, Default)]
pub struct TestSubscriptionRequest {
    pub url: Option<String>,
}

/// Ask Uber Eats to deliver a test event
pub async fn test_subscription(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TestSubscriptionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = req.url.unwrap_or_else(|| ingress_url(&state));
    validate_url(&url)?;

    state.uber.test_webhook(&url).await.map_err(upstream)?;
    Ok(Json(serde_json::json!({ "message": "Test webhook requested", "url": url })))
}
