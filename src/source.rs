//! Client side of the remote message agent.
//!
//! The agent exposes a per-group queue over HTTP. Both endpoints take the shared
//! token in a JSON body and answer `{"messages": [...]}`:
//!
//! * `POST {host}/api/peekMessages/{group}` reads without consuming.
//! * `POST {host}/api/getMessages/{group}` reads and removes.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub text: String,
    /// Unix seconds, as sent by the agent.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Lenient conversion: anything that is not an object becomes the message text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => Self::deserialize(&value).unwrap_or_else(|_| Self {
                text: value.to_string(),
                ..Default::default()
            }),
            Value::String(text) => Self::new(text),
            other => Self::new(other.to_string()),
        }
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Number of pending messages for `group`, without consuming them.
    async fn peek_count(&self, group: &str) -> Result<usize>;

    /// Pending messages for `group`. `peek_only` leaves them in the remote queue.
    async fn fetch(&self, group: &str, peek_only: bool) -> Result<Vec<Message>>;
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Clone)]
pub struct AgentClient {
    host: String,
    token: Option<String>,
    count_timeout: Duration,
    fetch_timeout: Duration,
    client: Client,
}

impl AgentClient {
    pub fn new(host: impl Into<String>, token: Option<String>) -> Self {
        Self {
            host: host.into(),
            token,
            count_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            client: Client::new(),
        }
    }

    pub fn with_timeouts(mut self, count_timeout: Duration, fetch_timeout: Duration) -> Self {
        self.count_timeout = count_timeout;
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn endpoint(&self, action: &str, group: &str) -> Result<Url> {
        let mut url =
            Url::parse(&self.host).with_context(|| format!("invalid agent host: {}", self.host))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("agent host cannot be a base URL: {}", self.host))?
            .pop_if_empty()
            .extend(["api", action, group]);
        Ok(url)
    }

    async fn post_messages(&self, action: &str, group: &str, timeout: Duration) -> Result<Vec<Value>> {
        let url = self.endpoint(action, group)?;
        debug!(%url, "agent request");
        let response = self
            .client
            .post(url.clone())
            .json(&json!({ "token": self.token }))
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read agent response body")?;
        debug!(%url, %status, body = %body, "agent response");
        if !status.is_success() {
            return Err(anyhow!("agent answered {status}: {body}"));
        }
        let envelope: MessagesEnvelope =
            serde_json::from_str(&body).context("agent response is not a messages envelope")?;
        Ok(envelope.messages)
    }
}

#[async_trait]
impl MessageSource for AgentClient {
    async fn peek_count(&self, group: &str) -> Result<usize> {
        match self
            .post_messages("peekMessages", group, self.count_timeout)
            .await
        {
            Ok(messages) => {
                debug!(group, count = messages.len(), "pending message count");
                Ok(messages.len())
            }
            Err(err) => {
                error!(group, "failed to check message count: {err:#}");
                Ok(0)
            }
        }
    }

    async fn fetch(&self, group: &str, peek_only: bool) -> Result<Vec<Message>> {
        let action = if peek_only {
            "peekMessages"
        } else {
            "getMessages"
        };
        match self.post_messages(action, group, self.fetch_timeout).await {
            Ok(raw) => {
                let messages = raw.into_iter().map(Message::from_value).collect::<Vec<_>>();
                let verb = if peek_only {
                    "peeked"
                } else {
                    "retrieved and removed"
                };
                info!(group, "{verb} {} messages", messages.len());
                Ok(messages)
            }
            Err(err) => {
                error!(group, peek_only, "failed to get messages: {err:#}");
                Ok(Vec::new())
            }
        }
    }
}
