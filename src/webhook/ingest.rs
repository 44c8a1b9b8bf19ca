use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use super::UNKNOWN_EVENT_ID;
use crate::config::Settings;
use crate::crypto::{is_timestamp_fresh, verify_signature};
use crate::db::Database;
use crate::models::{metadata_field, resource_ids, NewWebhookEvent, WebhookEvent, SOURCE_UBER_EATS};

/// Why an inbound delivery was turned away before it was stored
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Webhook timestamp is outside the accepted window")]
    StaleTimestamp,
    #[error("Invalid JSON payload: {0}")]
    MalformedPayload(String),
    #[error("Missing event_type in webhook metadata")]
    MissingEventType,
    #[error("Failed to store webhook event: {0:#}")]
    Storage(anyhow::Error),
}

/// An inbound delivery as received
pub struct Delivery<'a> {
    pub body: &'a [u8],
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    /// Headers kept with the event for audit
    pub headers: Value,
}

/// Verify, parse and durably store a delivery.
///
/// Nothing is stored unless every check passes. The returned event is
/// PENDING; scheduling its processing is up to the caller.
pub fn ingest(
    db: &Database,
    settings: &Settings,
    delivery: Delivery<'_>,
) -> Result<WebhookEvent, IngestError> {
    if !verify_signature(
        delivery.body,
        delivery.signature,
        delivery.timestamp,
        &settings.webhook_secret,
        settings.verify_signatures,
    ) {
        tracing::warn!(
            has_signature = delivery.signature.is_some(),
            has_timestamp = delivery.timestamp.is_some(),
            "Rejected webhook with invalid signature"
        );
        return Err(IngestError::InvalidSignature);
    }

    if let (true, Some(max_age)) = (settings.verify_signatures, settings.webhook_max_age_secs) {
        let timestamp = delivery.timestamp.unwrap_or_default();
        if !is_timestamp_fresh(timestamp, Utc::now().timestamp(), max_age) {
            tracing::warn!(timestamp, max_age, "Rejected webhook with stale timestamp");
            return Err(IngestError::StaleTimestamp);
        }
    }

    let raw = std::str::from_utf8(delivery.body)
        .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
    let payload: Value =
        serde_json::from_str(raw).map_err(|e| IngestError::MalformedPayload(e.to_string()))?;

    let event_type = metadata_field(&payload, "event_type").ok_or(IngestError::MissingEventType)?;
    let event_id = metadata_field(&payload, "event_id").unwrap_or(UNKNOWN_EVENT_ID);
    let (store_id, order_id) = resource_ids(&payload);

    let event = db
        .create_event(&NewWebhookEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            source: SOURCE_UBER_EATS.to_string(),
            payload: raw.to_string(),
            headers: delivery.headers,
            signature_verified: settings.verify_signatures,
            store_id,
            order_id,
        })
        .map_err(IngestError::Storage)?;

    tracing::info!(
        record_id = %event.id,
        event_id = %event.event_id,
        event_type = %event.event_type,
        "Webhook event received"
    );
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_payload;
    use crate::models::EventStatus;
    use serde_json::json;

    const SECRET: &str = "whsec_test";
    const BODY: &str = r#"{"metadata":{"event_type":"orders.notification","event_id":"evt_1"},"order_id":"ord_1","store_id":"store_1"}"#;

    fn settings() -> Settings {
        Settings {
            webhook_secret: SECRET.to_string(),
            ..Settings::default()
        }
    }

    fn signed(body: &str) -> (String, String) {
        let ts = Utc::now().timestamp().to_string();
        (sign_payload(body.as_bytes(), &ts, SECRET), ts)
    }

    fn delivery<'a>(body: &'a str, sig: &'a str, ts: &'a str) -> Delivery<'a> {
        Delivery {
            body: body.as_bytes(),
            signature: Some(sig),
            timestamp: Some(ts),
            headers: json!({ "X-Uber-Timestamp": ts }),
        }
    }

    #[test]
    fn test_valid_delivery_is_stored_pending() {
        let db = Database::open_in_memory().unwrap();
        let (sig, ts) = signed(BODY);

        let event = ingest(&db, &settings(), delivery(BODY, &sig, &ts)).unwrap();
        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.event_type, "orders.notification");
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.order_id.as_deref(), Some("ord_1"));
        assert!(event.signature_verified);
        assert_eq!(db.get_event(&event.id).unwrap().unwrap().payload, BODY);
    }

    #[test]
    fn test_bad_signature_stores_nothing() {
        let db = Database::open_in_memory().unwrap();
        let (_, ts) = signed(BODY);

        let err = ingest(&db, &settings(), delivery(BODY, "deadbeef", &ts)).unwrap_err();
        assert!(matches!(err, IngestError::InvalidSignature));

        let err = ingest(
            &db,
            &settings(),
            Delivery {
                body: BODY.as_bytes(),
                signature: None,
                timestamp: None,
                headers: json!({}),
            },
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::InvalidSignature));

        let stored = db
            .list_events(&crate::models::EventFilter {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn test_malformed_and_untyped_bodies_are_rejected() {
        let db = Database::open_in_memory().unwrap();

        let (sig, ts) = signed("{not json");
        let err = ingest(&db, &settings(), delivery("{not json", &sig, &ts)).unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));

        let body = r#"{"metadata":{"event_id":"evt_2"}}"#;
        let (sig, ts) = signed(body);
        let err = ingest(&db, &settings(), delivery(body, &sig, &ts)).unwrap_err();
        assert!(matches!(err, IngestError::MissingEventType));

        let count = db
            .list_events(&crate::models::EventFilter {
                limit: 10,
                ..Default::default()
            })
            .unwrap()
            .len();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_missing_event_id_defaults_to_unknown() {
        let db = Database::open_in_memory().unwrap();
        let body = r#"{"metadata":{"event_type":"store.status"}}"#;
        let (sig, ts) = signed(body);

        let event = ingest(&db, &settings(), delivery(body, &sig, &ts)).unwrap();
        assert_eq!(event.event_id, UNKNOWN_EVENT_ID);
    }

    #[test]
    fn test_verification_disabled_accepts_unsigned() {
        let db = Database::open_in_memory().unwrap();
        let settings = Settings {
            verify_signatures: false,
            ..settings()
        };

        let event = ingest(
            &db,
            &settings,
            Delivery {
                body: BODY.as_bytes(),
                signature: None,
                timestamp: None,
                headers: json!({}),
            },
        )
        .unwrap();
        assert!(!event.signature_verified);
    }

    #[test]
    fn test_stale_timestamp_rejected_when_window_configured() {
        let db = Database::open_in_memory().unwrap();
        let settings = Settings {
            webhook_max_age_secs: Some(300),
            ..settings()
        };
        let ts = (Utc::now().timestamp() - 3600).to_string();
        let sig = sign_payload(BODY.as_bytes(), &ts, SECRET);

        let err = ingest(&db, &settings, delivery(BODY, &sig, &ts)).unwrap_err();
        assert!(matches!(err, IngestError::StaleTimestamp));

        // Without a window the same delivery is accepted
        assert!(ingest(&db, &self::settings(), delivery(BODY, &sig, &ts)).is_ok());
    }
}
