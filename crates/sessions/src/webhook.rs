//! Outbound webhook delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::config::WebhookConfig;
use cg_domain::error::{Error, Result};

/// JSON body POSTed to a subscriber: `{ "id": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookBody {
    pub id: String,
    pub data: Value,
}

impl WebhookBody {
    /// Build a body for subscription `id`, converting numbers in `payload`
    /// to strings.
    pub fn new(id: impl Into<String>, payload: &Value) -> Self {
        Self {
            id: id.into(),
            data: stringify_numbers(payload),
        }
    }
}

/// Recursively replace every JSON number with its decimal string form.
pub fn stringify_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(stringify_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), stringify_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// POST `body` to `webhook`. Any transport error or non-2xx status is
    /// an error.
    async fn deliver(&self, webhook: &str, body: &WebhookBody) -> Result<()>;
}

/// `reqwest`-backed sender sharing one connection pool.
#[derive(Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Http(format!("building webhook client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn deliver(&self, webhook: &str, body: &WebhookBody) -> Result<()> {
        let resp = self
            .client
            .post(webhook)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("POST {webhook}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("POST {webhook}: HTTP {status}")));
        }
        Ok(())
    }
}
