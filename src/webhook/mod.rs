mod client;
mod dispatcher;
mod events;
mod handlers;
mod ingest;
mod retry;
mod sandbox;

pub use client::WebhookClient;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use events::*;
pub use handlers::*;
pub use ingest::{ingest, Delivery, IngestError};
pub use retry::RetryReceipt;
pub use sandbox::*;

/// Placeholder event id for deliveries whose metadata carries none
pub const UNKNOWN_EVENT_ID: &str = "unknown";
