//! Session lifecycle endpoints and protocol-node event ingest.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use cg_domain::config::ChannelConfig;
use cg_domain::error::Error;
use cg_sessions::{ConnectOptions, SessionInfo};

use super::error::ApiResult;
use crate::state::AppState;

/// Optional `?identity=` selector. Absent means the first session.
#[derive(Debug, Default, Deserialize)]
pub struct IdentityQuery {
    #[serde(default)]
    pub identity: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions: Vec<SessionInfo> = state.manager.sessions().iter().map(|s| s.info()).collect();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/current?identity=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn current_session(
    State(state): State<AppState>,
    Query(q): Query<IdentityQuery>,
) -> ApiResult<Json<SessionInfo>> {
    let session = state.manager.get_session(q.identity.as_deref())?;
    Ok(Json(session.info()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/connect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connect request. Omitted fields fall back to `[channel]` config.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectBody {
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub eth_provider_url: Option<String>,
    #[serde(default)]
    pub node_url: Option<String>,
    /// Seed override; replaces the stored seed for this and later connects.
    #[serde(default)]
    pub mnemonic: Option<String>,
}

impl ConnectBody {
    pub fn into_options(self, defaults: &ChannelConfig) -> ConnectOptions {
        let pick = |v: Option<String>, d: &str| {
            v.filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| d.to_owned())
        };
        ConnectOptions {
            network: pick(self.network, &defaults.network),
            eth_provider_url: pick(self.eth_provider_url, &defaults.eth_provider_url),
            node_url: pick(self.node_url, &defaults.node_url),
            mnemonic: self.mnemonic.filter(|m| !m.trim().is_empty()),
        }
    }
}

/// Connect a new session. A connection that reports an identity already
/// connected answers with the existing session.
pub async fn connect(
    State(state): State<AppState>,
    Json(body): Json<ConnectBody>,
) -> ApiResult<Json<SessionInfo>> {
    let options = body.into_options(&state.config.channel);
    match state.manager.connect_session(options).await {
        Ok(session) => Ok(Json(session.info())),
        Err(Error::AlreadyConnected(identity)) => {
            let existing = state.manager.get_session(Some(&identity))?;
            Ok(Json(existing.info()))
        }
        Err(e) => Err(e.into()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn disconnect(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<Value>> {
    state.manager.disconnect(&identity).await?;
    Ok(Json(serde_json::json!({ "disconnected": identity })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:identity/events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EventBody {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Event pushed by the protocol node. Emits on the session's bus and waits
/// for every listener; delivery failures never fail the request.
pub async fn ingest_event(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(body): Json<EventBody>,
) -> ApiResult<Json<Value>> {
    if body.event.trim().is_empty() {
        return Err(Error::InvalidParam("event is required".into()).into());
    }
    let session = state.manager.get_session(Some(&identity))?;
    let listeners = session.client().events().emit(&body.event, body.payload).await;
    tracing::debug!(identity = %identity, event = %body.event, listeners, "event ingested");
    Ok(Json(serde_json::json!({ "listeners": listeners })))
}
