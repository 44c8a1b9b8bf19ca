use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

/// Processing status of a stored webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Processed => "PROCESSED",
            EventStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(EventStatus::Pending),
            "PROCESSING" => Some(EventStatus::Processing),
            "PROCESSED" => Some(EventStatus::Processed),
            "FAILED" => Some(EventStatus::Failed),
            _ => None,
        }
    }

    /// Whether a dispatch may move this event into PROCESSING
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventStatus::Pending | EventStatus::Failed)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a stored event came from
pub const SOURCE_UBER_EATS: &str = "uber_eats";
pub const SOURCE_SANDBOX: &str = "sandbox";

/// A webhook delivery as recorded in the event store
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    /// Body exactly as received
    #[serde(serialize_with = "serialize_raw_json")]
    pub payload: String,
    pub headers: serde_json::Value,
    pub status: EventStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub signature_verified: bool,
    pub store_id: Option<String>,
    pub order_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Parse the stored body for handlers
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }
}

/// Emit the stored body verbatim when it is valid JSON, as a string otherwise
fn serialize_raw_json<S: Serializer>(payload: &str, serializer: S) -> Result<S::Ok, S::Error> {
    match RawValue::from_string(payload.to_string()) {
        Ok(raw) => raw.serialize(serializer),
        Err(_) => serializer.serialize_str(payload),
    }
}

/// Input for appending a delivery to the event store
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub payload: String,
    pub headers: serde_json::Value,
    pub signature_verified: bool,
    pub store_id: Option<String>,
    pub order_id: Option<String>,
}

/// Filters for listing stored events
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub status: Option<EventStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Pull the sender metadata out of a parsed body
pub fn metadata_field<'a>(payload: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    payload
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Best-effort store/order ids for indexing; handlers do their own strict parsing
pub fn resource_ids(payload: &serde_json::Value) -> (Option<String>, Option<String>) {
    let lookup = |key: &str| {
        payload
            .get(key)
            .or_else(|| payload.get("data").and_then(|d| d.get(key)))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };
    (lookup("store_id"), lookup("order_id"))
}
