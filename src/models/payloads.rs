//! Typed views over the webhook bodies the event handlers act on.
//!
//! Identifiers are looked up at the top level first, then inside `data`,
//! then in `metadata.resource_id`, since deliveries do not agree on where
//! they put them.

use serde::{Deserialize, Serialize};

/// The `metadata` object every delivery carries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMetadata {
    pub event_type: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub webhook_version: Option<String>,
}

/// Nested `data` object used by some deliveries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub report_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWebhook {
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub uber_order_id: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub new_status: Option<String>,
    #[serde(default)]
    pub old_status: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
    #[serde(default)]
    pub scheduled_for: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub data: Option<ResourceData>,
}

impl OrderWebhook {
    pub fn order_id(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .or(self.uber_order_id.as_deref())
            .or_else(|| self.data.as_ref().and_then(|d| d.order_id.as_deref()))
            .or(self.metadata.resource_id.as_deref())
    }

    pub fn store_id(&self) -> Option<&str> {
        self.store_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.store_id.as_deref()))
    }

    /// `new_status` when present, else `status`
    pub fn new_status(&self) -> Option<&str> {
        self.new_status.as_deref().or(self.status.as_deref())
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason
            .as_deref()
            .or(self.cancel_reason.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreWebhook {
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub uber_store_id: Option<String>,
    #[serde(default)]
    pub external_store_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub new_status: Option<String>,
    #[serde(default)]
    pub old_status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub data: Option<ResourceData>,
}

impl StoreWebhook {
    pub fn store_id(&self) -> Option<&str> {
        self.store_id
            .as_deref()
            .or(self.uber_store_id.as_deref())
            .or_else(|| self.data.as_ref().and_then(|d| d.store_id.as_deref()))
            .or(self.metadata.resource_id.as_deref())
    }

    /// `new_status` when present, else `status`
    pub fn new_status(&self) -> Option<&str> {
        self.new_status.as_deref().or(self.status.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentIssueWebhook {
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub issue_description: Option<String>,
    #[serde(default)]
    pub affected_items: Vec<serde_json::Value>,
    #[serde(default)]
    pub data: Option<ResourceData>,
}

impl FulfillmentIssueWebhook {
    pub fn order_id(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.order_id.as_deref()))
            .or(self.metadata.resource_id.as_deref())
    }

    pub fn store_id(&self) -> Option<&str> {
        self.store_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.store_id.as_deref()))
    }

    pub fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .or(self.issue_description.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportWebhook {
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub report_id: Option<String>,
    #[serde(default)]
    pub report_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub data: Option<ResourceData>,
}

impl ReportWebhook {
    pub fn report_id(&self) -> Option<&str> {
        self.report_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.report_id.as_deref()))
            .or(self.metadata.resource_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_ids_resolve_in_order() {
        let top: OrderWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "orders.notification", "resource_id": "res_1" },
            "order_id": "ord_top",
            "data": { "order_id": "ord_data", "store_id": "store_data" }
        }))
        .unwrap();
        assert_eq!(top.order_id(), Some("ord_top"));
        assert_eq!(top.store_id(), Some("store_data"));

        let nested: OrderWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "orders.notification", "resource_id": "res_1" },
            "data": { "order_id": "ord_data" }
        }))
        .unwrap();
        assert_eq!(nested.order_id(), Some("ord_data"));

        let meta_only: OrderWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "orders.notification", "resource_id": "res_1" }
        }))
        .unwrap();
        assert_eq!(meta_only.order_id(), Some("res_1"));
    }

    #[test]
    fn test_status_aliases() {
        let update: OrderWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "orders.status_update" },
            "new_status": "ACCEPTED",
            "cancel_reason": "OUT_OF_ITEMS"
        }))
        .unwrap();
        assert_eq!(update.new_status(), Some("ACCEPTED"));
        assert_eq!(update.cancellation_reason(), Some("OUT_OF_ITEMS"));

        let plain: StoreWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "store.status" },
            "status": "OFFLINE"
        }))
        .unwrap();
        assert_eq!(plain.new_status(), Some("OFFLINE"));
    }

    #[test]
    fn test_both_status_spellings_are_accepted() {
        let update: OrderWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "orders.status_update" },
            "status": "ACCEPTED",
            "new_status": "READY_FOR_PICKUP",
            "cancellation_reason": "CUSTOMER_CANCELLED",
            "cancel_reason": "OUT_OF_ITEMS"
        }))
        .unwrap();
        assert_eq!(update.new_status(), Some("READY_FOR_PICKUP"));
        assert_eq!(update.cancellation_reason(), Some("CUSTOMER_CANCELLED"));

        let store: StoreWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "store.status" },
            "status": "ONLINE",
            "new_status": "PAUSED"
        }))
        .unwrap();
        assert_eq!(store.new_status(), Some("PAUSED"));

        let issue: FulfillmentIssueWebhook = serde_json::from_value(json!({
            "metadata": { "event_type": "orders.fulfillment_issue" },
            "description": "Out of oat milk",
            "issue_description": "Item unavailable"
        }))
        .unwrap();
        assert_eq!(issue.description(), Some("Out of oat milk"));
    }

    #[test]
    fn test_wrong_field_types_are_rejected() {
        let result: Result<StoreWebhook, _> = serde_json::from_value(json!({
            "metadata": { "event_type": "store.status" },
            "store_id": 42
        }));
        assert!(result.is_err());

        let missing_metadata: Result<ReportWebhook, _> =
            serde_json::from_value(json!({ "report_id": "rep_1" }));
        assert!(missing_metadata.is_err());
    }
}
