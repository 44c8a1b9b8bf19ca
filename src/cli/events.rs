use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiClient, OutputFormat};
use crate::models::EventStatus;

/// A stored event as the management API returns it
#[derive(Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub signature_verified: bool,
    pub store_id: Option<String>,
    pub order_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl std::fmt::Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event:     {} ({})", self.event_id, self.id)?;
        writeln!(f, "Type:      {}", self.event_type)?;
        writeln!(f, "Source:    {}", self.source)?;
        writeln!(f, "Status:    {} after {} attempt(s)", self.status, self.attempts)?;
        writeln!(f, "Verified:  {}", if self.signature_verified { "yes" } else { "no" })?;
        writeln!(f, "Received:  {}", self.received_at.format("%Y-%m-%d %H:%M:%S"))?;
        if let Some(processed) = self.processed_at {
            writeln!(f, "Processed: {}", processed.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(store) = &self.store_id {
            writeln!(f, "Store:     {}", store)?;
        }
        if let Some(order) = &self.order_id {
            writeln!(f, "Order:     {}", order)?;
        }
        if let Some(error) = &self.error_message {
            writeln!(f, "Error:     {}", error)?;
        }
        let payload = serde_json::to_string_pretty(&self.payload).map_err(|_| std::fmt::Error)?;
        write!(f, "Payload:\n{}", payload)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct EventList {
    pub events: Vec<EventRecord>,
}

impl std::fmt::Display for EventList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.events.is_empty() {
            return write!(f, "No events.");
        }
        for e in &self.events {
            writeln!(
                f,
                "  {}  {:<32} {:<11} {:>2}x  {}",
                e.received_at.format("%Y-%m-%d %H:%M:%S"),
                e.event_type,
                e.status.as_str(),
                e.attempts,
                e.event_id
            )?;
            if let Some(error) = &e.error_message {
                writeln!(f, "      {}", error)?;
            }
        }
        Ok(())
    }
}

/// Filters for `events list`
#[derive(Debug, Default)]
pub struct ListOptions<'a> {
    pub event_type: Option<&'a str>,
    pub status: Option<&'a str>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListOptions<'_> {
    fn query(&self) -> String {
        let mut params = Vec::new();
        if let Some(t) = self.event_type {
            params.push(format!("event_type={}", urlencoding::encode(t)));
        }
        if let Some(s) = self.status {
            params.push(format!("status={}", urlencoding::encode(s)));
        }
        if let Some(l) = self.limit {
            params.push(format!("limit={}", l));
        }
        if let Some(o) = self.offset {
            params.push(format!("offset={}", o));
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// List stored events
pub async fn run_events_list(api: &ApiClient, options: &ListOptions<'_>, format: OutputFormat) -> Result<()> {
    let events: Vec<EventRecord> = api
        .get(&format!("/v1/webhooks/events{}", options.query()), "list events")
        .await?;
    format.print(&EventList { events })
}

/// Show one event
pub async fn run_events_show(api: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let event: EventRecord = api
        .get(
            &format!("/v1/webhooks/events/{}", urlencoding::encode(id)),
            "fetch event",
        )
        .await?;
    format.print(&event)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResult {
    pub message: String,
    pub event_id: String,
    pub accepted: bool,
    pub status: EventStatus,
}

impl std::fmt::Display for RetryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (was {})", self.event_id, self.message, self.status)
    }
}

/// Ask the server to process a failed event again
pub async fn run_events_retry(api: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let result: RetryResult = api
        .post(
            &format!("/v1/webhooks/events/{}/retry", urlencoding::encode(id)),
            "retry event",
        )
        .await?;
    format.print(&result)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxResult {
    pub message: String,
    pub event_type: String,
    pub event_id: String,
    pub status: EventStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub payload: serde_json::Value,
}

impl std::fmt::Display for SandboxResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} -> {}", self.event_type, self.event_id, self.status)?;
        if let Some(error) = &self.error {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

/// Inject a synthetic event on a sandbox server
pub async fn run_sandbox_event(
    api: &ApiClient,
    event_type: &str,
    store_id: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut path = format!(
        "/v1/webhooks/test?event_type={}",
        urlencoding::encode(event_type)
    );
    if let Some(store) = store_id {
        path.push_str("&store_id=");
        path.push_str(&urlencoding::encode(store));
    }
    let result: SandboxResult = api.post(&path, "send sandbox event").await?;
    format.print(&result)
}
