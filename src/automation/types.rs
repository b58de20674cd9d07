use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_GET_MSG_MINUTES: u64 = 5;
pub const DEFAULT_MIN_MSG_COUNT: i64 = 1;
pub const DEFAULT_PROCESS_MAX_TIME: u64 = 30;

/// One automation job, persisted as `<automation_id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub automation_id: String,
    pub owner: String,
    pub customer_id: String,
    pub active: bool,
    pub agent_group: String,
    pub agent_peek_only: bool,
    pub prompts: Vec<String>,
    /// Polling interval, minutes.
    pub get_msg_minutes: u64,
    pub min_msg_count: i64,
    /// Longest wait, in minutes, before a below-minimum backlog is processed anyway.
    pub process_max_time: u64,
}

/// Fields for a new job. Unset optionals take the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub owner: String,
    pub customer_id: String,
    pub agent_group: String,
    pub prompts: Vec<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub agent_peek_only: Option<bool>,
    #[serde(default)]
    pub get_msg_minutes: Option<u64>,
    #[serde(default)]
    pub min_msg_count: Option<i64>,
    #[serde(default)]
    pub process_max_time: Option<u64>,
}

impl NewJob {
    pub fn new(
        owner: impl Into<String>,
        customer_id: impl Into<String>,
        agent_group: impl Into<String>,
        prompts: Vec<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            customer_id: customer_id.into(),
            agent_group: agent_group.into(),
            prompts,
            ..Default::default()
        }
    }

    pub fn into_config(self, automation_id: String) -> JobConfig {
        JobConfig {
            automation_id,
            owner: self.owner,
            customer_id: self.customer_id,
            active: self.active.unwrap_or(true),
            agent_group: self.agent_group,
            agent_peek_only: self.agent_peek_only.unwrap_or(false),
            prompts: self.prompts,
            get_msg_minutes: self.get_msg_minutes.unwrap_or(DEFAULT_GET_MSG_MINUTES),
            min_msg_count: self.min_msg_count.unwrap_or(DEFAULT_MIN_MSG_COUNT),
            process_max_time: self.process_max_time.unwrap_or(DEFAULT_PROCESS_MAX_TIME),
        }
    }
}

/// Partial update. `automation_id` is not patchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPatch {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub agent_group: Option<String>,
    #[serde(default)]
    pub agent_peek_only: Option<bool>,
    #[serde(default)]
    pub prompts: Option<Vec<String>>,
    #[serde(default)]
    pub get_msg_minutes: Option<u64>,
    #[serde(default)]
    pub min_msg_count: Option<i64>,
    #[serde(default)]
    pub process_max_time: Option<u64>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.customer_id.is_none()
            && self.active.is_none()
            && self.agent_group.is_none()
            && self.agent_peek_only.is_none()
            && self.prompts.is_none()
            && self.get_msg_minutes.is_none()
            && self.min_msg_count.is_none()
            && self.process_max_time.is_none()
    }

    pub fn apply(self, config: &mut JobConfig) {
        if let Some(v) = self.owner {
            config.owner = v;
        }
        if let Some(v) = self.customer_id {
            config.customer_id = v;
        }
        if let Some(v) = self.active {
            config.active = v;
        }
        if let Some(v) = self.agent_group {
            config.agent_group = v;
        }
        if let Some(v) = self.agent_peek_only {
            config.agent_peek_only = v;
        }
        if let Some(v) = self.prompts {
            config.prompts = v;
        }
        if let Some(v) = self.get_msg_minutes {
            config.get_msg_minutes = v;
        }
        if let Some(v) = self.min_msg_count {
            config.min_msg_count = v;
        }
        if let Some(v) = self.process_max_time {
            config.process_max_time = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Started,
    Check,
    Process,
    Timeout,
    Processed,
    Warning,
    Error,
    Stopped,
    Created,
    Deleted,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Started => "started",
            Action::Check => "check",
            Action::Process => "process",
            Action::Timeout => "timeout",
            Action::Processed => "processed",
            Action::Warning => "warning",
            Action::Error => "error",
            Action::Stopped => "stopped",
            Action::Created => "created",
            Action::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub automation_id: String,
    pub action: Action,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ActivityLogEntry {
    /// Reads an integer counter out of `details`, e.g. `message_count`.
    pub fn detail_count(&self, key: &str) -> u64 {
        self.details
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}
