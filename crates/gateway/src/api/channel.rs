//! Pass-through protocol calls: `POST /v1/channel/:method`.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use cg_sessions::ChannelMethod;

use super::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ChannelCallBody {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// Forward `params` to the session's channel client and return its result
/// verbatim.
pub async fn call(
    State(state): State<AppState>,
    Path(method): Path<String>,
    Json(body): Json<ChannelCallBody>,
) -> ApiResult<Json<Value>> {
    let method: ChannelMethod = method.parse()?;
    let session = state.manager.get_session(body.identity.as_deref())?;
    let result = session.client().call(method, body.params).await?;
    Ok(Json(result))
}
