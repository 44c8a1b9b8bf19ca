use serde::{Deserialize, Serialize};

/// Event types Uber Eats delivers to the webhook endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    /// New order placed with a store
    #[serde(rename = "orders.notification")]
    OrderCreated,
    /// Order cancelled by the customer, store or Uber
    #[serde(rename = "orders.cancel")]
    OrderCancelled,
    /// Order moved to a new state
    #[serde(rename = "orders.status_update")]
    OrderStatusUpdated,
    /// Order placed for a future time
    #[serde(rename = "orders.scheduled_notification")]
    ScheduledOrderCreated,
    /// Courier or store reported a problem fulfilling an order
    #[serde(rename = "orders.fulfillment_issue")]
    FulfillmentIssue,
    /// Store went online, offline or paused
    #[serde(rename = "store.status")]
    StoreStatusUpdated,
    /// Store connected to this integration
    #[serde(rename = "store.provisioned")]
    StoreProvisioned,
    /// Store disconnected from this integration
    #[serde(rename = "store.deprovisioned")]
    StoreDeprovisioned,
    /// Requested report is ready for download
    #[serde(rename = "report.success")]
    ReportCompleted,
    /// Requested report could not be generated
    #[serde(rename = "report.failure")]
    ReportFailed,
}

impl WebhookEventType {
    pub const ALL: [WebhookEventType; 10] = [
        WebhookEventType::OrderCreated,
        WebhookEventType::OrderCancelled,
        WebhookEventType::OrderStatusUpdated,
        WebhookEventType::ScheduledOrderCreated,
        WebhookEventType::FulfillmentIssue,
        WebhookEventType::StoreStatusUpdated,
        WebhookEventType::StoreProvisioned,
        WebhookEventType::StoreDeprovisioned,
        WebhookEventType::ReportCompleted,
        WebhookEventType::ReportFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::OrderCreated => "orders.notification",
            WebhookEventType::OrderCancelled => "orders.cancel",
            WebhookEventType::OrderStatusUpdated => "orders.status_update",
            WebhookEventType::ScheduledOrderCreated => "orders.scheduled_notification",
            WebhookEventType::FulfillmentIssue => "orders.fulfillment_issue",
            WebhookEventType::StoreStatusUpdated => "store.status",
            WebhookEventType::StoreProvisioned => "store.provisioned",
            WebhookEventType::StoreDeprovisioned => "store.deprovisioned",
            WebhookEventType::ReportCompleted => "report.success",
            WebhookEventType::ReportFailed => "report.failure",
        }
    }

    /// Exact match against the known types; anything else is unrecognized
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_exact() {
        for t in WebhookEventType::ALL {
            assert_eq!(WebhookEventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(WebhookEventType::parse("Store.Status"), None);
        assert_eq!(WebhookEventType::parse("order.placed"), None);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&WebhookEventType::StoreStatusUpdated).unwrap();
        assert_eq!(json, r#""store.status""#);

        let parsed: WebhookEventType = serde_json::from_str(r#""report.success""#).unwrap();
        assert_eq!(parsed, WebhookEventType::ReportCompleted);
    }
}
