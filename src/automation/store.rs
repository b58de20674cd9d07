use crate::automation::types::JobConfig;
use crate::utils::safe_filename;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Directory of job records, one pretty-printed JSON file per job.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, automation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(automation_id)))
    }

    /// Every parseable record. Malformed files are logged and skipped.
    pub async fn load_all(&self) -> HashMap<String, JobConfig> {
        let mut configs = HashMap::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return configs,
            Err(err) => {
                error!(dir = %self.dir.display(), "failed to list automation configs: {err}");
                return configs;
            }
        };

        loop {
            let path = match entries.next_entry().await {
                Ok(Some(entry)) => entry.path(),
                Ok(None) => break,
                Err(err) => {
                    error!(dir = %self.dir.display(), "failed to read directory entry: {err}");
                    break;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(config) => {
                    info!(automation_id = %config.automation_id, "loaded automation config");
                    configs.insert(config.automation_id.clone(), config);
                }
                Err(err) => error!(file = %path.display(), "failed to load config: {err:#}"),
            }
        }
        configs
    }

    async fn read(path: &Path) -> Result<JobConfig> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub async fn load(&self, automation_id: &str) -> Option<JobConfig> {
        Self::read(&self.path_for(automation_id)).await.ok()
    }

    async fn write(&self, config: &JobConfig) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let text = serde_json::to_string_pretty(config)?;
        tokio::fs::write(self.path_for(&config.automation_id), text).await?;
        Ok(())
    }

    /// Persists `config`; an I/O failure is logged and reported as `false`.
    pub async fn save(&self, config: &JobConfig) -> bool {
        match self.write(config).await {
            Ok(()) => true,
            Err(err) => {
                error!(automation_id = %config.automation_id, "failed to save config: {err:#}");
                false
            }
        }
    }

    /// Removes the record; `false` when there was nothing to remove.
    pub async fn remove(&self, automation_id: &str) -> bool {
        match tokio::fs::remove_file(self.path_for(automation_id)).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                error!(automation_id, "failed to delete config: {err}");
                false
            }
        }
    }
}
