use anyhow::Result;
use serde::Serialize;

use super::Dispatcher;
use crate::models::EventStatus;

/// Answer to a manual retry request
#[derive(Debug, Clone, Serialize)]
pub struct RetryReceipt {
    pub message: String,
    pub event_id: String,
    pub id: String,
    pub accepted: bool,
    pub status: EventStatus,
}

impl Dispatcher {
    /// Schedule another processing attempt for a stored event.
    ///
    /// `key` is an internal id or a sender event id (latest delivery wins).
    /// Only PENDING and FAILED events are scheduled; a retry of an event that
    /// is processing or already processed is answered with `accepted: false`.
    /// Returns None when no such event exists.
    pub fn retry(&self, key: &str) -> Result<Option<RetryReceipt>> {
        let Some(event) = self.db.find_event(key)? else {
            return Ok(None);
        };

        let accepted = event.status.is_retryable();
        let message = if accepted {
            self.spawn(event.id.clone());
            tracing::info!(
                record_id = %event.id,
                event_id = %event.event_id,
                attempts = event.attempts,
                "Webhook event retry scheduled"
            );
            "Event retry scheduled".to_string()
        } else {
            format!("Event is {}, not retrying", event.status)
        };

        Ok(Some(RetryReceipt {
            message,
            event_id: event.event_id,
            id: event.id,
            accepted,
            status: event.status,
        }))
    }
}
