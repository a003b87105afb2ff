//! HTTP bridge to a protocol node.
//!
//! Connecting checks `GET {node_url}/config`. Each pass-through call is a
//! `POST {node_url}/{method}` with `{ public_identifier, params }`. Events
//! flow the other way: the node POSTs them to
//! `/v1/sessions/:identity/events`, which emits on the client's bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use cg_domain::config::ChannelConfig;
use cg_domain::error::{Error, Result};
use cg_sessions::{ChannelClient, ChannelConnector, ChannelMethod, ConnectOptions, EventBus, Wallet};

pub struct HttpChannelConnector {
    http: reqwest::Client,
}

impl HttpChannelConnector {
    pub fn new(config: &ChannelConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("building channel client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ChannelConnector for HttpChannelConnector {
    async fn connect(
        &self,
        wallet: &Wallet,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn ChannelClient>> {
        let base = options.node_url.trim_end_matches('/').to_owned();
        let url = format!("{base}/config");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::UpstreamConnect(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamConnect(format!("GET {url}: HTTP {status}")));
        }

        tracing::info!(
            node_url = %base,
            network = %options.network,
            identity = %wallet.public_identifier,
            "protocol node reachable"
        );

        Ok(Arc::new(HttpChannelClient {
            http: self.http.clone(),
            base,
            identity: wallet.public_identifier.clone(),
            address: wallet.address.clone(),
            bus: EventBus::new(),
        }))
    }
}

pub struct HttpChannelClient {
    http: reqwest::Client,
    base: String,
    identity: String,
    address: String,
    bus: EventBus,
}

fn call_error(method: ChannelMethod, message: impl Into<String>) -> Error {
    Error::UpstreamCall {
        method: method.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    fn public_identifier(&self) -> &str {
        &self.identity
    }

    fn signer_address(&self) -> &str {
        &self.address
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }

    async fn call(&self, method: ChannelMethod, params: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base, method.as_str());
        let body = serde_json::json!({
            "public_identifier": self.identity,
            "params": params,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| call_error(method, e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| call_error(method, e.to_string()))?;
        if !status.is_success() {
            return Err(call_error(method, format!("HTTP {status}: {text}")));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| call_error(method, format!("invalid JSON: {e}")))
    }
}
