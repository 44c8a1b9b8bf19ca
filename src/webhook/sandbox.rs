use chrono::Utc;
use serde_json::{json, Value};

use super::WebhookEventType;
use crate::db::Database;
use crate::models::{metadata_field, resource_ids, NewWebhookEvent, WebhookEvent, SOURCE_SANDBOX};

/// Store id used when the caller does not name one
pub const DEFAULT_SANDBOX_STORE: &str = "sandbox_store";

/// Build a realistic delivery body for `event_type`.
///
/// Each call gets a fresh `sandbox_<uuid>` event id and matching order or
/// report ids, so sandbox events never collide with real deliveries.
pub fn synthetic_payload(event_type: WebhookEventType, store_id: &str) -> Value {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let event_id = format!("sandbox_{}", suffix);
    let order_id = format!("sandbox_order_{}", &suffix[..12]);
    let report_id = format!("sandbox_report_{}", &suffix[..12]);
    let now = Utc::now();

    let resource_id = match event_type {
        WebhookEventType::StoreStatusUpdated
        | WebhookEventType::StoreProvisioned
        | WebhookEventType::StoreDeprovisioned => store_id.to_string(),
        WebhookEventType::ReportCompleted | WebhookEventType::ReportFailed => report_id.clone(),
        _ => order_id.clone(),
    };

    let metadata = json!({
        "event_type": event_type.as_str(),
        "event_id": event_id,
        "event_time": now.to_rfc3339(),
        "resource_id": resource_id,
        "webhook_version": "1.0",
    });

    let body = match event_type {
        WebhookEventType::OrderCreated => json!({
            "order_id": order_id,
            "store_id": store_id,
            "status": "CREATED",
            "total": 24.5,
            "items": [
                { "id": "item_burger", "title": "Cheeseburger", "quantity": 2, "price": 9.5 },
                { "id": "item_fries", "title": "Fries", "quantity": 1, "price": 5.5 }
            ]
        }),
        WebhookEventType::OrderCancelled => json!({
            "order_id": order_id,
            "store_id": store_id,
            "status": "CANCELLED",
            "cancellation_reason": "CUSTOMER_CANCELLED",
            "cancelled_by": "EATER"
        }),
        WebhookEventType::OrderStatusUpdated => json!({
            "order_id": order_id,
            "store_id": store_id,
            "old_status": "ACCEPTED",
            "new_status": "READY_FOR_PICKUP"
        }),
        WebhookEventType::ScheduledOrderCreated => json!({
            "order_id": order_id,
            "store_id": store_id,
            "status": "SCHEDULED",
            "scheduled_for": (now + chrono::Duration::hours(2)).to_rfc3339(),
            "total": 42.0
        }),
        WebhookEventType::FulfillmentIssue => json!({
            "order_id": order_id,
            "store_id": store_id,
            "issue_type": "ITEM_OUT_OF_STOCK",
            "description": "Fries unavailable",
            "affected_items": [{ "id": "item_fries", "quantity": 1 }]
        }),
        WebhookEventType::StoreStatusUpdated => json!({
            "store_id": store_id,
            "old_status": "ONLINE",
            "new_status": "PAUSED",
            "reason": "HIGH_VOLUME"
        }),
        WebhookEventType::StoreProvisioned => json!({
            "store_id": store_id,
            "external_store_id": format!("ext_{}", store_id),
            "status": "PROVISIONED"
        }),
        WebhookEventType::StoreDeprovisioned => json!({
            "store_id": store_id,
            "external_store_id": format!("ext_{}", store_id),
            "status": "DEPROVISIONED"
        }),
        WebhookEventType::ReportCompleted => json!({
            "report_id": report_id,
            "report_type": "ORDERS",
            "status": "SUCCESS",
            "download_url": format!("https://reports.example.invalid/{}.csv", report_id)
        }),
        WebhookEventType::ReportFailed => json!({
            "report_id": report_id,
            "report_type": "ORDERS",
            "status": "FAILURE",
            "error_message": "Report generation timed out"
        }),
    };

    let mut payload = body;
    payload["metadata"] = metadata;
    payload
}

/// Store a synthetic event as PENDING, ready for dispatch
pub fn store_synthetic(
    db: &Database,
    event_type: WebhookEventType,
    store_id: &str,
) -> anyhow::Result<(WebhookEvent, Value)> {
    let payload = synthetic_payload(event_type, store_id);
    let (store, order) = resource_ids(&payload);
    let event = db.create_event(&NewWebhookEvent {
        event_id: metadata_field(&payload, "event_id")
            .unwrap_or_default()
            .to_string(),
        event_type: event_type.as_str().to_string(),
        source: SOURCE_SANDBOX.to_string(),
        payload: payload.to_string(),
        headers: json!({}),
        signature_verified: false,
        store_id: store,
        order_id: order,
    })?;
    tracing::info!(
        record_id = %event.id,
        event_id = %event.event_id,
        event_type = %event.event_type,
        "Sandbox webhook event created"
    );
    Ok((event, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderWebhook, ReportWebhook, StoreWebhook};

    #[test]
    fn test_every_type_carries_metadata() {
        for t in WebhookEventType::ALL {
            let payload = synthetic_payload(t, "store_9");
            assert_eq!(metadata_field(&payload, "event_type"), Some(t.as_str()));
            assert!(metadata_field(&payload, "event_id")
                .unwrap()
                .starts_with("sandbox_"));
        }
    }

    #[test]
    fn test_store_synthetic_marks_source() {
        let db = Database::open_in_memory().unwrap();
        let (event, payload) =
            store_synthetic(&db, WebhookEventType::StoreProvisioned, "store_9").unwrap();

        assert_eq!(event.source, SOURCE_SANDBOX);
        assert!(!event.signature_verified);
        assert_eq!(event.store_id.as_deref(), Some("store_9"));
        assert_eq!(metadata_field(&payload, "event_id"), Some(event.event_id.as_str()));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = synthetic_payload(WebhookEventType::OrderCreated, "s");
        let b = synthetic_payload(WebhookEventType::OrderCreated, "s");
        assert_ne!(
            metadata_field(&a, "event_id"),
            metadata_field(&b, "event_id")
        );
    }

    #[test]
    fn test_payloads_match_handler_schemas() {
        let order: OrderWebhook = serde_json::from_value(synthetic_payload(
            WebhookEventType::OrderStatusUpdated,
            "store_9",
        ))
        .unwrap();
        assert_eq!(order.store_id(), Some("store_9"));
        assert_eq!(order.new_status(), Some("READY_FOR_PICKUP"));

        let store: StoreWebhook = serde_json::from_value(synthetic_payload(
            WebhookEventType::StoreStatusUpdated,
            "store_9",
        ))
        .unwrap();
        assert_eq!(store.store_id(), Some("store_9"));

        let report: ReportWebhook = serde_json::from_value(synthetic_payload(
            WebhookEventType::ReportCompleted,
            "store_9",
        ))
        .unwrap();
        assert!(report.report_id().unwrap().starts_with("sandbox_report_"));

        let (store_id, order_id) =
            resource_ids(&synthetic_payload(WebhookEventType::OrderCreated, "store_9"));
        assert_eq!(store_id.as_deref(), Some("store_9"));
        assert!(order_id.unwrap().starts_with("sandbox_order_"));
    }
}
