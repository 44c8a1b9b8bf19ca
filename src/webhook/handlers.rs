use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::{WebhookEventType, UNKNOWN_EVENT_ID};
use crate::db::Database;
use crate::models::{
    FulfillmentIssueWebhook, OrderWebhook, ReportWebhook, StoreWebhook, WebhookEvent,
};

/// A per-event-type processor.
///
/// Returning an error (or panicking, or exceeding the dispatch timeout) marks
/// the stored event FAILED. Handlers run again on retry with the same stored
/// payload, so side effects go through [`HandlerContext::apply_once`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()>;
}

/// What a handler knows about the delivery it is processing
pub struct HandlerContext {
    db: Database,
    pub record_id: String,
    pub event_id: String,
    pub event_type: String,
    pub attempt: u32,
}

impl HandlerContext {
    pub fn new(db: Database, event: &WebhookEvent, attempt: u32) -> Self {
        Self {
            db,
            record_id: event.id.clone(),
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            attempt,
        }
    }

    /// Idempotency key for a side effect.
    ///
    /// Keyed on the resource when the handler has one, otherwise on the
    /// sender's event id, otherwise on this delivery's row.
    pub fn effect_key(&self, resource: Option<&str>) -> String {
        match resource {
            Some(r) => format!("{}:{}", self.event_type, r),
            None if self.event_id != UNKNOWN_EVENT_ID => {
                format!("{}:evt:{}", self.event_type, self.event_id)
            }
            None => format!("{}:row:{}", self.event_type, self.record_id),
        }
    }

    /// Run `action` unless an effect with this key was already applied.
    ///
    /// Returns whether the action ran. The claim is committed only when the
    /// action succeeds. Any other exit releases it, including a panic or the
    /// dispatcher dropping this future on timeout.
    pub async fn apply_once<F>(&self, effect_key: &str, action: F) -> Result<bool>
    where
        F: Future<Output = Result<()>> + Send,
    {
        if !self.db.claim_effect(effect_key, &self.record_id)? {
            tracing::info!(
                event_id = %self.event_id,
                effect = effect_key,
                "Effect already applied, skipping"
            );
            return Ok(false);
        }

        let mut claim = EffectClaim {
            db: &self.db,
            key: effect_key,
            record_id: &self.record_id,
            settled: false,
        };
        action.await?;
        self.db.commit_effect(effect_key, &self.record_id)?;
        claim.settled = true;
        Ok(true)
    }
}

/// Releases an uncommitted effect claim when dropped
struct EffectClaim<'a> {
    db: &'a Database,
    key: &'a str,
    record_id: &'a str,
    settled: bool,
}

impl Drop for EffectClaim<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self.db.release_effect(self.key, self.record_id) {
            tracing::warn!(effect = self.key, "Failed to release effect claim: {:#}", e);
        }
    }
}

fn parse<'a, T: Deserialize<'a>>(payload: &'a Value, what: &str) -> Result<T> {
    T::deserialize(payload).with_context(|| format!("Invalid {} payload", what))
}

pub struct OrderNotificationHandler;

#[async_trait]
impl EventHandler for OrderNotificationHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let order: OrderWebhook = parse(payload, "order notification")?;
        let key = ctx.effect_key(order.order_id());

        ctx.apply_once(&key, async {
            tracing::info!(
                order_id = order.order_id().unwrap_or("-"),
                store_id = order.store_id().unwrap_or("-"),
                total = ?order.total,
                "New order received"
            );
            Ok(())
        })
        .await?;
        Ok(())
    }
}

pub struct OrderCancelHandler;

#[async_trait]
impl EventHandler for OrderCancelHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let order: OrderWebhook = parse(payload, "order cancellation")?;
        let key = ctx.effect_key(order.order_id());

        ctx.apply_once(&key, async {
            tracing::info!(
                order_id = order.order_id().unwrap_or("-"),
                store_id = order.store_id().unwrap_or("-"),
                reason = order.cancellation_reason().unwrap_or("-"),
                cancelled_by = order.cancelled_by.as_deref().unwrap_or("-"),
                "Order cancelled"
            );
            Ok(())
        })
        .await?;
        Ok(())
    }
}

pub struct OrderStatusHandler;

#[async_trait]
impl EventHandler for OrderStatusHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let order: OrderWebhook = parse(payload, "order status update")?;
        // An order passes through each status once
        let resource = match (order.order_id(), order.new_status()) {
            (Some(id), Some(status)) => Some(format!("{}:{}", id, status)),
            _ => None,
        };
        let key = ctx.effect_key(resource.as_deref());

        ctx.apply_once(&key, async {
            tracing::info!(
                order_id = order.order_id().unwrap_or("-"),
                store_id = order.store_id().unwrap_or("-"),
                old_status = order.old_status.as_deref().unwrap_or("-"),
                new_status = order.new_status().unwrap_or("-"),
                "Order status updated"
            );
            Ok(())
        })
        .await?;
        Ok(())
    }
}

pub struct ScheduledOrderHandler;

#[async_trait]
impl EventHandler for ScheduledOrderHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let order: OrderWebhook = parse(payload, "scheduled order")?;
        let key = ctx.effect_key(order.order_id());

        ctx.apply_once(&key, async {
            tracing::info!(
                order_id = order.order_id().unwrap_or("-"),
                store_id = order.store_id().unwrap_or("-"),
                scheduled_for = order.scheduled_for.as_deref().unwrap_or("-"),
                "Scheduled order created"
            );
            Ok(())
        })
        .await?;
        Ok(())
    }
}

pub struct FulfillmentIssueHandler;

#[async_trait]
impl EventHandler for FulfillmentIssueHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let issue: FulfillmentIssueWebhook = parse(payload, "fulfillment issue")?;
        // The same order can report several issues
        let key = ctx.effect_key(None);

        ctx.apply_once(&key, async {
            tracing::warn!(
                order_id = issue.order_id().unwrap_or("-"),
                store_id = issue.store_id().unwrap_or("-"),
                issue_type = issue.issue_type.as_deref().unwrap_or("-"),
                description = issue.description().unwrap_or("-"),
                affected_items = issue.affected_items.len(),
                "Fulfillment issue reported"
            );
            Ok(())
        })
        .await?;
        Ok(())
    }
}

pub struct StoreStatusHandler;

#[async_trait]
impl EventHandler for StoreStatusHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let store: StoreWebhook = parse(payload, "store status")?;
        let key = ctx.effect_key(None);

        ctx.apply_once(&key, async {
            tracing::info!(
                store_id = store.store_id().unwrap_or("-"),
                old_status = store.old_status.as_deref().unwrap_or("-"),
                new_status = store.new_status().unwrap_or("-"),
                reason = store.reason.as_deref().unwrap_or("-"),
                "Store status updated"
            );
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// Handles both store.provisioned and store.deprovisioned
pub struct StoreProvisioningHandler {
    pub provisioned: bool,
}

#[async_trait]
impl EventHandler for StoreProvisioningHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let store: StoreWebhook = parse(payload, "store provisioning")?;
        let key = ctx.effect_key(None);

        ctx.apply_once(&key, async {
            let store_id = store.store_id().unwrap_or("-");
            let external_store_id = store.external_store_id.as_deref().unwrap_or("-");
            if self.provisioned {
                tracing::info!(store_id, external_store_id, "Store provisioned");
            } else {
                tracing::info!(store_id, external_store_id, "Store deprovisioned");
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// Handles both report.success and report.failure
pub struct ReportHandler;

#[async_trait]
impl EventHandler for ReportHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: &Value) -> Result<()> {
        let report: ReportWebhook = parse(payload, "report")?;
        let key = ctx.effect_key(report.report_id());
        let succeeded = ctx.event_type == WebhookEventType::ReportCompleted.as_str();

        ctx.apply_once(&key, async {
            let report_id = report.report_id().unwrap_or("-");
            let report_type = report.report_type.as_deref().unwrap_or("-");
            if succeeded {
                tracing::info!(
                    report_id,
                    report_type,
                    download_url = report.download_url.as_deref().unwrap_or("-"),
                    "Report ready"
                );
            } else {
                tracing::warn!(
                    report_id,
                    report_type,
                    error = report.error_message.as_deref().unwrap_or("-"),
                    "Report generation failed"
                );
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// Catch-all for event types this service does not know yet
pub struct UnknownEventHandler;

#[async_trait]
impl EventHandler for UnknownEventHandler {
    async fn handle(&self, ctx: &HandlerContext, _payload: &Value) -> Result<()> {
        tracing::warn!(
            event_id = %ctx.event_id,
            event_type = %ctx.event_type,
            "Unknown webhook event type, nothing to do"
        );
        Ok(())
    }
}

/// Handlers for every known event type
pub fn default_handlers() -> HashMap<WebhookEventType, Arc<dyn EventHandler>> {
    let mut handlers: HashMap<WebhookEventType, Arc<dyn EventHandler>> = HashMap::new();
    handlers.insert(WebhookEventType::OrderCreated, Arc::new(OrderNotificationHandler));
    handlers.insert(WebhookEventType::OrderCancelled, Arc::new(OrderCancelHandler));
    handlers.insert(WebhookEventType::OrderStatusUpdated, Arc::new(OrderStatusHandler));
    handlers.insert(
        WebhookEventType::ScheduledOrderCreated,
        Arc::new(ScheduledOrderHandler),
    );
    handlers.insert(WebhookEventType::FulfillmentIssue, Arc::new(FulfillmentIssueHandler));
    handlers.insert(WebhookEventType::StoreStatusUpdated, Arc::new(StoreStatusHandler));
    handlers.insert(
        WebhookEventType::StoreProvisioned,
        Arc::new(StoreProvisioningHandler { provisioned: true }),
    );
    handlers.insert(
        WebhookEventType::StoreDeprovisioned,
        Arc::new(StoreProvisioningHandler { provisioned: false }),
    );
    handlers.insert(WebhookEventType::ReportCompleted, Arc::new(ReportHandler));
    handlers.insert(WebhookEventType::ReportFailed, Arc::new(ReportHandler));
    handlers
}
