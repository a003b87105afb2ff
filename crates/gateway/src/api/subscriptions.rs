//! Webhook subscription endpoints. Every request may name a session with
//! `identity`; without one the first session is used.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::error::Result;
use cg_sessions::SubscribeRequest;

use super::error::ApiResult;
use super::sessions::IdentityQuery;
use crate::state::AppState;

/// Render one batch item as `{ ..value }` or `{ "error": "..." }`.
fn item<T: Serialize>(result: Result<T>) -> Value {
    match result {
        Ok(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscribe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    #[serde(default)]
    pub identity: Option<String>,
    pub event: String,
    pub webhook: String,
}

/// `POST /v1/subscribe` returns `{ "id": ... }`; repeating an identical
/// pair returns the same id.
pub async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<SubscribeBody>,
) -> ApiResult<Json<Value>> {
    let session = state.manager.get_session(body.identity.as_deref())?;
    let sub = session
        .subscriptions()
        .subscribe(&body.event, &body.webhook)
        .await?;
    Ok(Json(serde_json::json!({ "id": sub.id })))
}

#[derive(Debug, Deserialize)]
pub struct BatchSubscribeBody {
    #[serde(default)]
    pub identity: Option<String>,
    pub subscriptions: Vec<SubscribeRequest>,
}

/// `POST /v1/subscribe/batch`. One result per input, in order.
pub async fn batch_subscribe(
    State(state): State<AppState>,
    Json(body): Json<BatchSubscribeBody>,
) -> ApiResult<Json<Value>> {
    let session = state.manager.get_session(body.identity.as_deref())?;
    let results: Vec<Value> = session
        .subscriptions()
        .batch_subscribe(&body.subscriptions)
        .await
        .into_iter()
        .map(|r| item(r.map(|s| serde_json::json!({ "id": s.id }))))
        .collect();
    Ok(Json(serde_json::json!({ "results": results })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unsubscribe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
    #[serde(default)]
    pub identity: Option<String>,
    pub id: String,
}

/// `POST /v1/unsubscribe`. Unknown ids are 404.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<UnsubscribeBody>,
) -> ApiResult<Json<Value>> {
    let session = state.manager.get_session(body.identity.as_deref())?;
    session.subscriptions().unsubscribe(&body.id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct BatchUnsubscribeBody {
    #[serde(default)]
    pub identity: Option<String>,
    pub ids: Vec<String>,
}

/// `POST /v1/unsubscribe/batch`
pub async fn batch_unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<BatchUnsubscribeBody>,
) -> ApiResult<Json<Value>> {
    let session = state.manager.get_session(body.identity.as_deref())?;
    let results: Vec<Value> = session
        .subscriptions()
        .batch_unsubscribe(&body.ids)
        .await
        .into_iter()
        .zip(&body.ids)
        .map(|(r, id)| item(r.map(|()| serde_json::json!({ "id": id, "ok": true }))))
        .collect();
    Ok(Json(serde_json::json!({ "results": results })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearBody {
    #[serde(default)]
    pub identity: Option<String>,
}

/// `POST /v1/unsubscribe/all`
pub async fn unsubscribe_all(
    State(state): State<AppState>,
    Json(body): Json<ClearBody>,
) -> ApiResult<Json<Value>> {
    let session = state.manager.get_session(body.identity.as_deref())?;
    let removed = session.subscriptions().clear_all().await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/subscriptions?identity=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(q): Query<IdentityQuery>,
) -> ApiResult<Json<Value>> {
    let session = state.manager.get_session(q.identity.as_deref())?;
    let subscriptions = session.subscriptions().list();
    Ok(Json(serde_json::json!({
        "identity": session.identity,
        "count": subscriptions.len(),
        "subscriptions": subscriptions,
    })))
}
