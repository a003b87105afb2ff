pub mod auth;
pub mod channel;
pub mod error;
pub mod sessions;
pub mod subscriptions;
pub mod wallets;

use axum::middleware;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        // Sessions
        .route("/v1/connect", post(sessions::connect))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/current", get(sessions::current_session))
        .route("/v1/sessions/:identity", delete(sessions::disconnect))
        .route("/v1/sessions/:identity/events", post(sessions::ingest_event))
        // Seed & wallets
        .route("/v1/mnemonic", post(wallets::set_mnemonic))
        .route("/v1/wallets", get(wallets::list_wallets).post(wallets::create_wallet))
        // Subscriptions
        .route("/v1/subscribe", post(subscriptions::subscribe))
        .route("/v1/subscribe/batch", post(subscriptions::batch_subscribe))
        .route("/v1/unsubscribe", post(subscriptions::unsubscribe))
        .route("/v1/unsubscribe/batch", post(subscriptions::batch_unsubscribe))
        .route("/v1/unsubscribe/all", post(subscriptions::unsubscribe_all))
        .route("/v1/subscriptions", get(subscriptions::list_subscriptions))
        // Channel pass-through
        .route("/v1/channel/:method", post(channel::call))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// `GET /health`: liveness check (public, no auth).
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
