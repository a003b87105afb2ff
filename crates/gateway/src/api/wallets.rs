//! Seed and wallet endpoints.

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use cg_sessions::WalletSummary;

use super::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MnemonicBody {
    pub mnemonic: String,
}

/// `POST /v1/mnemonic`. Affects later connects only.
pub async fn set_mnemonic(
    State(state): State<AppState>,
    Json(body): Json<MnemonicBody>,
) -> ApiResult<Json<Value>> {
    state.manager.set_seed(&body.mnemonic).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletBody {
    pub index: u32,
}

/// `POST /v1/wallets`
pub async fn create_wallet(
    State(state): State<AppState>,
    Json(body): Json<CreateWalletBody>,
) -> ApiResult<Json<WalletSummary>> {
    let summary = state.manager.keyring().create_wallet(body.index).await?;
    Ok(Json(summary))
}

/// `GET /v1/wallets`
pub async fn list_wallets(State(state): State<AppState>) -> Json<Value> {
    let wallets: Vec<WalletSummary> = state
        .manager
        .keyring()
        .wallets()
        .iter()
        .map(|w| w.summary())
        .collect();
    Json(serde_json::json!({
        "count": wallets.len(),
        "wallets": wallets,
    }))
}
