use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::admin_auth;
use super::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes: health and the signed ingress endpoint
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        .route("/v1/webhooks", post(handlers::webhooks::receive_webhook));

    // Management routes (admin key when configured)
    let protected_routes = Router::new()
        // Stored events
        .route("/v1/webhooks/events", get(handlers::webhooks::list_events))
        .route(
            "/v1/webhooks/events/:event_id",
            get(handlers::webhooks::get_event),
        )
        .route(
            "/v1/webhooks/events/:event_id/retry",
            post(handlers::webhooks::retry_event),
        )
        // Sandbox
        .route("/v1/webhooks/test", post(handlers::webhooks::test_webhook))
        // Upstream subscriptions
        .route(
            "/v1/webhooks/subscriptions",
            get(handlers::subscriptions::list_subscriptions)
                .post(handlers::subscriptions::create_subscription),
        )
        .route(
            "/v1/webhooks/subscriptions/test",
            post(handlers::subscriptions::test_subscription),
        )
        .route(
            "/v1/webhooks/subscriptions/:id",
            put(handlers::subscriptions::update_subscription)
                .delete(handlers::subscriptions::delete_subscription),
        )
        // OAuth
        .route("/v1/oauth/token", post(handlers::oauth::token))
        .route("/v1/oauth/revoke", post(handlers::oauth::revoke))
        .route("/v1/oauth/introspect", post(handlers::oauth::introspect))
        .route("/v1/oauth/authorize", get(handlers::oauth::authorize))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
