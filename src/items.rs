use crate::extract::ExtractionResult;
use crate::extract::prompts::expected_category;
use crate::utils::safe_filename;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Durable home for extracted items. Returns the identifiers it assigned.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn save(&self, result: &ExtractionResult) -> Result<Vec<String>>;
}

/// Items already on record for a prompt type, handed to the model so it does not
/// report them again.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn active_items(&self, prompt_type: &str, today: NaiveDate) -> Result<Vec<Value>>;
}

/// One JSON file per item, grouped in a folder per category.
pub struct FileItemStore {
    root: PathBuf,
}

impl FileItemStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder_for(category: &str) -> String {
        match category {
            "todos" => "todo".to_string(),
            "events" => "calendar".to_string(),
            "items" => "general".to_string(),
            other => safe_filename(other),
        }
    }

    /// Folder holding the items a prompt type produces.
    pub fn folder_for_prompt(prompt_type: &str) -> String {
        match expected_category(prompt_type) {
            Some(category) => Self::folder_for(category),
            None => safe_filename(prompt_type),
        }
    }

    async fn read_folder(&self, folder: &str) -> Result<Vec<Value>> {
        let dir = self.root.join(folder);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to list {}", dir.display()));
            }
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<Value>(&raw) {
                Ok(item) => items.push(item),
                Err(err) => warn!(file = %path.display(), "skipping unreadable item: {err}"),
            }
        }
        Ok(items)
    }
}

fn date_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

/// Events need a date that has not passed. Everything else counts while it has no
/// due date or one that has not passed.
fn is_current(item: &Value, prompt_type: &str, today: NaiveDate) -> bool {
    if item.get("status").and_then(Value::as_str) != Some("active") {
        return false;
    }
    match prompt_type {
        "calendar" => date_field(item, "date")
            .or_else(|| date_field(item, "start_time"))
            .and_then(parse_day)
            .is_some_and(|day| day >= today),
        _ => match date_field(item, "due_date") {
            None => true,
            Some(raw) => parse_day(raw).is_some_and(|day| day >= today),
        },
    }
}

#[async_trait]
impl ContextSource for FileItemStore {
    async fn active_items(&self, prompt_type: &str, today: NaiveDate) -> Result<Vec<Value>> {
        let mut items = self
            .read_folder(&Self::folder_for_prompt(prompt_type))
            .await?
            .into_iter()
            .filter(|item| is_current(item, prompt_type, today))
            .collect::<Vec<_>>();
        items.sort_by(|a, b| {
            let created = |v: &Value| v.get("created_at").and_then(Value::as_str).map(str::to_owned);
            created(a).cmp(&created(b))
        });
        debug!(prompt_type, count = items.len(), "active items for context");
        Ok(items)
    }
}

#[async_trait]
impl ItemSink for FileItemStore {
    async fn save(&self, result: &ExtractionResult) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(result.item_count());
        for (category, items) in &result.categories {
            if items.is_empty() {
                continue;
            }
            let dir = self.root.join(Self::folder_for(category));
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;

            for item in items {
                let id = Uuid::new_v4().to_string();
                let mut record = match item {
                    Value::Object(fields) => fields.clone(),
                    other => {
                        let mut fields = serde_json::Map::new();
                        fields.insert("value".to_string(), other.clone());
                        fields
                    }
                };
                record.insert("id".to_string(), json!(id));
                record.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
                record.insert("status".to_string(), json!("active"));

                let path = dir.join(format!("{id}.json"));
                let text = serde_json::to_string_pretty(&record)?;
                tokio::fs::write(&path, text)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                debug!(category, %id, "saved item");
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
