use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::handlers::{default_handlers, EventHandler, HandlerContext, UnknownEventHandler};
use super::WebhookEventType;
use crate::db::Database;
use crate::models::WebhookEvent;

/// How a dispatch attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Processed { attempts: u32 },
    Failed { attempts: u32, error: String },
    /// Another attempt holds the event, it is already processed, or it does not exist
    Skipped,
}

/// Routes stored events to their handler and records the result.
///
/// Each attempt first moves the event PENDING/FAILED -> PROCESSING in a single
/// conditional update, so at most one attempt per event runs at a time.
#[derive(Clone)]
pub struct Dispatcher {
    pub(super) db: Database,
    handlers: Arc<HashMap<WebhookEventType, Arc<dyn EventHandler>>>,
    fallback: Arc<dyn EventHandler>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db,
            handlers: Arc::new(default_handlers()),
            fallback: Arc::new(UnknownEventHandler),
            timeout,
        }
    }

    /// Replace the handler for one event type
    pub fn with_handler(mut self, event_type: WebhookEventType, handler: Arc<dyn EventHandler>) -> Self {
        Arc::make_mut(&mut self.handlers).insert(event_type, handler);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run [`Dispatcher::dispatch`] in the background
    pub fn spawn(&self, record_id: String) -> JoinHandle<DispatchOutcome> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(&record_id).await })
    }

    /// Process one stored event. Failures are recorded on the event, never returned.
    pub async fn dispatch(&self, record_id: &str) -> DispatchOutcome {
        let attempts = match self.db.begin_processing(record_id) {
            Ok(Some(attempts)) => attempts,
            Ok(None) => {
                tracing::debug!(record_id, "Event not dispatchable, skipping");
                return DispatchOutcome::Skipped;
            }
            Err(e) => {
                // Still PENDING or FAILED, picked up on retry or restart
                tracing::error!(record_id, "Failed to claim event for processing: {:#}", e);
                return DispatchOutcome::Skipped;
            }
        };

        let result = match self.db.get_event(record_id) {
            Ok(Some(event)) => self.run_handler(&event, attempts).await,
            Ok(None) => Err("Event disappeared during processing".to_string()),
            Err(e) => Err(format!("Failed to load event: {:#}", e)),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.db.mark_processed(record_id) {
                    tracing::error!(record_id, "Failed to mark event processed: {:#}", e);
                }
                tracing::info!(record_id, attempts, "Webhook event processed");
                DispatchOutcome::Processed { attempts }
            }
            Err(error) => {
                if let Err(e) = self.db.mark_failed(record_id, &error) {
                    tracing::error!(record_id, "Failed to mark event failed: {:#}", e);
                }
                tracing::warn!(record_id, attempts, error = %error, "Webhook event failed");
                DispatchOutcome::Failed { attempts, error }
            }
        }
    }

    fn handler_for(&self, event_type: &str) -> Arc<dyn EventHandler> {
        WebhookEventType::parse(event_type)
            .and_then(|t| self.handlers.get(&t).cloned())
            .unwrap_or_else(|| self.fallback.clone())
    }

    async fn run_handler(&self, event: &WebhookEvent, attempts: u32) -> Result<(), String> {
        let payload = event
            .payload_json()
            .map_err(|e| format!("Stored payload is not valid JSON: {}", e))?;

        let handler = self.handler_for(&event.event_type);
        let ctx = HandlerContext::new(self.db.clone(), event, attempts);
        let run = AssertUnwindSafe(handler.handle(&ctx, &payload)).catch_unwind();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
            Ok(Err(panic)) => Err(format!("Handler panicked: {}", panic_message(panic.as_ref()))),
            Err(_) => Err(format!(
                "Handler timed out after {}s",
                self.timeout.as_secs_f64()
            )),
        }
    }

    /// Fail events interrupted by a shutdown and re-dispatch the ones never started
    pub fn recover(&self) -> anyhow::Result<usize> {
        let (reset, pending) = self.db.recover_interrupted()?;
        if reset > 0 {
            tracing::warn!(count = reset, "Marked interrupted webhook events as failed");
        }
        let count = pending.len();
        for id in pending {
            self.spawn(id);
        }
        if count > 0 {
            tracing::info!(count, "Re-dispatching pending webhook events");
        }
        Ok(count)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{EventStatus, NewWebhookEvent, SOURCE_UBER_EATS};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn store(db: &Database, event_type: &str, payload: Value) -> WebhookEvent {
        db.create_event(&NewWebhookEvent {
            event_id: "evt_1".to_string(),
            event_type: event_type.to_string(),
            source: SOURCE_UBER_EATS.to_string(),
            payload: payload.to_string(),
            headers: json!({}),
            signature_verified: true,
            store_id: None,
            order_id: None,
        })
        .unwrap()
    }

    fn status_payload() -> Value {
        json!({
            "metadata": { "event_type": "store.status", "event_id": "evt_1" },
            "store_id": "store_1",
            "status": "ONLINE"
        })
    }

    /// Fails the first `failures` calls, then succeeds
    pub(crate) struct FlakyHandler {
        pub calls: AtomicUsize,
        pub failures: usize,
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        async fn handle(&self, _ctx: &HandlerContext, _payload: &Value) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("store service unavailable");
            }
            Ok(())
        }
    }

    struct SlowHandler {
        running: AtomicUsize,
        max_running: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl EventHandler for SlowHandler {
        async fn handle(&self, _ctx: &HandlerContext, _payload: &Value) -> anyhow::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _ctx: &HandlerContext, _payload: &Value) -> anyhow::Result<()> {
            panic!("malformed menu");
        }
    }

    enum Stall {
        Hang,
        Panic,
    }

    /// Applies one effect, stalling inside it on the first call
    struct StallingEffectHandler {
        calls: AtomicUsize,
        applied: AtomicUsize,
        stall: Stall,
    }

    #[async_trait]
    impl EventHandler for StallingEffectHandler {
        async fn handle(&self, ctx: &HandlerContext, _payload: &Value) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let key = ctx.effect_key(Some("store_1"));
            ctx.apply_once(&key, async {
                if call == 0 {
                    match self.stall {
                        Stall::Hang => tokio::time::sleep(Duration::from_secs(5)).await,
                        Stall::Panic => panic!("POS connection dropped"),
                    }
                }
                self.applied.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await?;
            Ok(())
        }
    }

    async fn assert_effect_applied_on_retry(stall: Stall) {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());
        let handler = Arc::new(StallingEffectHandler {
            calls: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
            stall,
        });
        let dispatcher = Dispatcher::new(db.clone(), Duration::from_millis(50))
            .with_handler(WebhookEventType::StoreStatusUpdated, handler.clone());

        let outcome = dispatcher.dispatch(&event.id).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { attempts: 1, .. }));
        assert_eq!(handler.applied.load(Ordering::SeqCst), 0);

        let outcome = dispatcher.dispatch(&event.id).await;
        assert_eq!(outcome, DispatchOutcome::Processed { attempts: 2 });
        assert_eq!(handler.applied.load(Ordering::SeqCst), 1);

        // Committed now, so a redelivery does not apply it again
        let redelivered = store(&db, "store.status", status_payload());
        let outcome = dispatcher.dispatch(&redelivered.id).await;
        assert_eq!(outcome, DispatchOutcome::Processed { attempts: 1 });
        assert_eq!(handler.applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_effect_is_applied_on_retry() {
        assert_effect_applied_on_retry(Stall::Hang).await;
    }

    #[tokio::test]
    async fn test_panicked_effect_is_applied_on_retry() {
        assert_effect_applied_on_retry(Stall::Panic).await;
    }

    fn dispatcher(db: &Database) -> Dispatcher {
        Dispatcher::new(db.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_dispatch_known_type() {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());

        let outcome = dispatcher(&db).dispatch(&event.id).await;
        assert_eq!(outcome, DispatchOutcome::Processed { attempts: 1 });

        let event = db.get_event(&event.id).unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Processed);
        assert_eq!(event.attempts, 1);
        assert!(event.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_type_is_processed() {
        let db = Database::open_in_memory().unwrap();
        let event = store(
            &db,
            "menu.updated",
            json!({ "metadata": { "event_type": "menu.updated" } }),
        );

        let outcome = dispatcher(&db).dispatch(&event.id).await;
        assert_eq!(outcome, DispatchOutcome::Processed { attempts: 1 });
    }

    #[tokio::test]
    async fn test_handler_error_marks_failed_then_retry_succeeds() {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());
        let dispatcher = dispatcher(&db).with_handler(
            WebhookEventType::StoreStatusUpdated,
            Arc::new(FlakyHandler {
                calls: AtomicUsize::new(0),
                failures: 1,
            }),
        );

        let outcome = dispatcher.dispatch(&event.id).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { attempts: 1, .. }));
        let failed = db.get_event(&event.id).unwrap().unwrap();
        assert_eq!(failed.status, EventStatus::Failed);
        assert!(failed
            .error_message
            .unwrap()
            .contains("store service unavailable"));

        let outcome = dispatcher.dispatch(&event.id).await;
        assert_eq!(outcome, DispatchOutcome::Processed { attempts: 2 });
        let done = db.get_event(&event.id).unwrap().unwrap();
        assert_eq!(done.status, EventStatus::Processed);
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_mistyped_payload_fails() {
        let db = Database::open_in_memory().unwrap();
        let event = store(
            &db,
            "store.status",
            json!({ "metadata": { "event_type": "store.status" }, "store_id": 7 }),
        );

        let outcome = dispatcher(&db).dispatch(&event.id).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());
        let dispatcher = dispatcher(&db)
            .with_handler(WebhookEventType::StoreStatusUpdated, Arc::new(PanickingHandler));

        match dispatcher.dispatch(&event.id).await {
            DispatchOutcome::Failed { error, .. } => assert!(error.contains("malformed menu")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_failure() {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());
        let dispatcher = Dispatcher::new(db.clone(), Duration::from_millis(20)).with_handler(
            WebhookEventType::StoreStatusUpdated,
            Arc::new(SlowHandler {
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                delay: Duration::from_secs(5),
            }),
        );

        match dispatcher.dispatch(&event.id).await {
            DispatchOutcome::Failed { error, .. } => assert!(error.contains("timed out")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            db.get_event(&event.id).unwrap().unwrap().status,
            EventStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_runs_handler_once() {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());
        let slow = Arc::new(SlowHandler {
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let dispatcher =
            dispatcher(&db).with_handler(WebhookEventType::StoreStatusUpdated, slow.clone());

        let (a, b) = tokio::join!(dispatcher.dispatch(&event.id), dispatcher.dispatch(&event.id));

        let outcomes = [a, b];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == DispatchOutcome::Skipped)
                .count(),
            1
        );
        assert_eq!(slow.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(db.get_event(&event.id).unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_processed_event_is_not_redispatched() {
        let db = Database::open_in_memory().unwrap();
        let event = store(&db, "store.status", status_payload());
        let dispatcher = dispatcher(&db);

        dispatcher.dispatch(&event.id).await;
        assert_eq!(dispatcher.dispatch(&event.id).await, DispatchOutcome::Skipped);
        assert_eq!(dispatcher.dispatch("missing").await, DispatchOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_recover_dispatches_pending() {
        let db = Database::open_in_memory().unwrap();
        let stuck = store(&db, "store.status", status_payload());
        let pending = store(&db, "store.status", status_payload());
        db.begin_processing(&stuck.id).unwrap();

        let dispatcher = dispatcher(&db);
        assert_eq!(dispatcher.recover().unwrap(), 1);

        for _ in 0..50 {
            let status = db.get_event(&pending.id).unwrap().unwrap().status;
            if status == EventStatus::Processed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            db.get_event(&pending.id).unwrap().unwrap().status,
            EventStatus::Processed
        );
        assert_eq!(
            db.get_event(&stuck.id).unwrap().unwrap().status,
            EventStatus::Failed
        );
    }
}
