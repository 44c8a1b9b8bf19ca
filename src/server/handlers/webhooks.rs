use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::ApiError;
use crate::models::{EventFilter, EventStatus, WebhookEvent};
use crate::server::AppState;
use crate::webhook::{
    ingest, store_synthetic, Delivery, DispatchOutcome, RetryReceipt, WebhookEventType,
    DEFAULT_SANDBOX_STORE,
};
use crate::{SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Headers kept with each stored event
const AUDIT_HEADERS: [&str; 5] = [
    SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
    "content-type",
    "user-agent",
    "x-request-id",
];

#[derive(Serialize)]
pub struct WebhookReceipt {
    pub received: bool,
    pub event_id: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn audit_headers(headers: &HeaderMap) -> Value {
    let kept: serde_json::Map<String, Value> = AUDIT_HEADERS
        .iter()
        .filter_map(|name| {
            header_str(headers, name).map(|v| (name.to_string(), Value::String(v.to_string())))
        })
        .collect();
    Value::Object(kept)
}

/// Ingress: verify, store, acknowledge, then process in the background
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = Delivery {
        body: &body,
        signature: header_str(&headers, SIGNATURE_HEADER),
        timestamp: header_str(&headers, TIMESTAMP_HEADER),
        headers: audit_headers(&headers),
    };

    match ingest(&state.db, &state.settings, delivery) {
        Ok(event) => {
            state.dispatcher.spawn(event.id.clone());
            Json(WebhookReceipt {
                received: true,
                event_id: event.event_id,
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct ListEventsQuery {
    pub event_type: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// RFC 3339 timestamp, or a bare date covering that whole day
fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date: {}", raw)))?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid date: {}", raw)))
}

/// List stored events, newest first
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<Vec<WebhookEvent>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            EventStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid status: {}", raw)))?,
        ),
        None => None,
    };

    let filter = EventFilter {
        event_type: query.event_type.filter(|t| !t.is_empty()),
        status,
        start: query
            .start_date
            .as_deref()
            .map(|d| parse_date(d, false))
            .transpose()?,
        end: query
            .end_date
            .as_deref()
            .map(|d| parse_date(d, true))
            .transpose()?,
        limit: state.settings.pagination().clamp(query.limit),
        offset: query.offset.unwrap_or(0),
    };

    Ok(Json(state.db.list_events(&filter)?))
}

/// Look up one event by internal id or sender event id
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<WebhookEvent>, ApiError> {
    state
        .db
        .find_event(&event_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))
}

/// Schedule another processing attempt
pub async fn retry_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<RetryReceipt>, ApiError> {
    state
        .dispatcher
        .retry(&event_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))
}

#[derive(Deserialize)]
pub struct TestWebhookQuery {
    pub event_type: String,
    pub store_id: Option<String>,
}

#[derive(Serialize)]
pub struct TestWebhookResponse {
    pub message: String,
    pub event_type: String,
    pub event_id: String,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub payload: Value,
}

/// Sandbox only: run a synthetic event through the normal dispatch path
pub async fn test_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TestWebhookQuery>,
) -> Result<Json<TestWebhookResponse>, ApiError> {
    if !state.settings.sandbox_mode {
        return Err(ApiError::Forbidden(
            "Test webhooks can only be sent in sandbox mode".to_string(),
        ));
    }

    let event_type = WebhookEventType::parse(&query.event_type).ok_or_else(|| {
        ApiError::BadRequest(format!("Unknown event type: {}", query.event_type))
    })?;
    let store_id = query
        .store_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SANDBOX_STORE);

    let (event, payload) = store_synthetic(&state.db, event_type, store_id)?;

    let (message, status, error) = match state.dispatcher.dispatch(&event.id).await {
        DispatchOutcome::Processed { .. } => {
            ("Test webhook processed", EventStatus::Processed, None)
        }
        DispatchOutcome::Failed { error, .. } => {
            ("Test webhook failed", EventStatus::Failed, Some(error))
        }
        DispatchOutcome::Skipped => ("Test webhook stored but not dispatched", EventStatus::Pending, None),
    };

    Ok(Json(TestWebhookResponse {
        message: message.to_string(),
        event_type: event_type.as_str().to_string(),
        event_id: event.event_id,
        status,
        error,
        payload,
    }))
}
