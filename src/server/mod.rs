mod handlers;
mod middleware;
mod routes;

pub use handlers::{ApiError, ErrorResponse};
pub use routes::create_router;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::db::Database;
use crate::uber::{UberEatsClient, UberOAuth};
use crate::webhook::Dispatcher;

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub settings: Settings,
    pub dispatcher: Dispatcher,
    pub oauth: Arc<UberOAuth>,
    pub uber: UberEatsClient,
}

impl AppState {
    pub fn new(db: Database, settings: Settings) -> Result<Self> {
        let dispatcher = Dispatcher::new(db.clone(), settings.handler_timeout);
        let oauth = Arc::new(UberOAuth::new(db.clone(), settings.uber.clone())?);
        let uber = UberEatsClient::new(&settings.uber, oauth.clone())?;

        Ok(Self {
            db,
            settings,
            dispatcher,
            oauth,
            uber,
        })
    }
}

/// Run the API server until Ctrl-C
pub async fn run_server(addr: SocketAddr, settings: Settings) -> Result<()> {
    if settings.verify_signatures && settings.webhook_secret.is_empty() {
        tracing::warn!("UBER_EATS_WEBHOOK_SECRET is empty; signed deliveries will not verify");
    }
    if !settings.verify_signatures {
        tracing::warn!("Webhook signature verification is disabled");
    }
    if settings.admin_api_key.is_none() {
        tracing::warn!("EATSD_ADMIN_API_KEY is not set; management routes are open");
    }

    // Open database
    let db = Database::open(&settings.database_path)
        .with_context(|| format!("Failed to open database at {}", settings.database_path))?;

    let state = Arc::new(AppState::new(db, settings)?);

    // Events cut off by the last shutdown
    state.dispatcher.recover()?;

    let app = create_router(state);

    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    pub(crate) const SECRET: &str = "whsec_test";

    pub(crate) fn test_settings() -> Settings {
        Settings {
            webhook_secret: SECRET.to_string(),
            ..Settings::default()
        }
    }

    pub(crate) fn test_state(settings: Settings) -> AppState {
        AppState::new(Database::open_in_memory().unwrap(), settings).unwrap()
    }

    /// Send one request through the router and decode the JSON body
    pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub(crate) fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(Arc::new(test_state(test_settings())));

        let (status, body) = send(app.clone(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "eatsd");
        assert_eq!(body["sandbox"], true);

        let (status, body) = send(app, get("/health/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"], "ok");
    }

    #[tokio::test]
    async fn test_admin_routes_require_key_when_configured() {
        let settings = Settings {
            admin_api_key: Some("admin_key".to_string()),
            ..test_settings()
        };
        let app = create_router(Arc::new(test_state(settings)));

        let (status, _) = send(app.clone(), get("/v1/webhooks/events")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/v1/webhooks/events")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app.clone(), wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let right = Request::builder()
            .uri("/v1/webhooks/events")
            .header("Authorization", "Bearer admin_key")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app.clone(), right).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        // Health stays public
        let (status, _) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
