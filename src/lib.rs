pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod models;
pub mod server;
pub mod uber;
pub mod webhook;

pub use models::*;

/// Default server URL for the CLI
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// API version prefix
pub const API_VERSION: &str = "v1";

/// Application name reported by health checks and outbound requests
pub const APP_NAME: &str = "eatsd";

/// Header carrying the HMAC signature of an inbound webhook
pub const SIGNATURE_HEADER: &str = "X-Uber-Signature";

/// Header carrying the timestamp an inbound webhook was signed with
pub const TIMESTAMP_HEADER: &str = "X-Uber-Timestamp";
