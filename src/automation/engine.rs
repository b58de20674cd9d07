use crate::automation::activity::ActivityLog;
use crate::automation::status::{self, DetailedStatus, JobStatus};
use crate::automation::store::ConfigStore;
use crate::automation::trigger::{Trigger, decide};
use crate::automation::types::{Action, ActivityLogEntry, JobConfig, JobPatch, NewJob};
use crate::extract::Extractor;
use crate::items::ItemSink;
use crate::source::{Message, MessageSource};
use futures_util::FutureExt;
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation not found: {0}")]
    NotFound(String),

    #[error("failed to persist automation {0}")]
    Persist(String),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Length of one `get_msg_minutes` unit.
    pub minute: Duration,
    /// Pause after an iteration that failed unexpectedly.
    pub error_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            minute: Duration::from_secs(60),
            error_backoff: Duration::from_secs(60),
        }
    }
}

impl EngineOptions {
    fn interval(&self, minutes: u64) -> Duration {
        let units = u32::try_from(minutes.max(1)).unwrap_or(u32::MAX);
        self.minute.saturating_mul(units)
    }
}

/// What a single polling iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Idle { count: usize },
    /// Triggered, but the fetch came back empty.
    EmptyFetch { count: usize },
    Processed {
        messages: usize,
        succeeded: usize,
        failed: usize,
    },
}

struct RunningJob {
    run_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    store: ConfigStore,
    source: Arc<dyn MessageSource>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ItemSink>,
    options: EngineOptions,
    configs: RwLock<HashMap<String, JobConfig>>,
    logs: ActivityLog,
    running: Mutex<HashMap<String, RunningJob>>,
    next_run_id: AtomicU64,
}

/// Owns every automation job: configuration, activity history and polling loops.
///
/// Disk is authoritative for configuration; the in-memory map is refreshed by
/// [`AutomationEngine::reload`] and kept in step by `create`/`update`/`delete`.
/// Each running job has its own tokio task, which re-reads the job's config at the
/// top of every iteration.
pub struct AutomationEngine {
    shared: Arc<Shared>,
}

impl AutomationEngine {
    pub fn new(
        store: ConfigStore,
        source: Arc<dyn MessageSource>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn ItemSink>,
    ) -> Self {
        Self::with_options(store, source, extractor, sink, EngineOptions::default())
    }

    pub fn with_options(
        store: ConfigStore,
        source: Arc<dyn MessageSource>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn ItemSink>,
        options: EngineOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                source,
                extractor,
                sink,
                options,
                configs: RwLock::new(HashMap::new()),
                logs: ActivityLog::default(),
                running: Mutex::new(HashMap::new()),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    /// Re-reads every record from disk. Jobs whose record vanished are dropped from
    /// memory; running loops notice on their next iteration.
    pub async fn reload(&self) -> HashMap<String, JobConfig> {
        let loaded = self.shared.store.load_all().await;
        let mut configs = self.shared.configs.write().await;
        configs.retain(|id, _| loaded.contains_key(id));
        for (id, config) in &loaded {
            configs.insert(id.clone(), config.clone());
        }
        loaded
    }

    pub async fn list_configs(&self) -> Vec<JobConfig> {
        let mut configs = self
            .shared
            .configs
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        configs.sort_by(|a, b| a.automation_id.cmp(&b.automation_id));
        configs
    }

    pub async fn get_config(&self, automation_id: &str) -> Option<JobConfig> {
        self.shared.config(automation_id).await
    }

    pub async fn create(&self, request: NewJob) -> Result<JobConfig, AutomationError> {
        let config = request.into_config(Uuid::new_v4().to_string());
        let id = config.automation_id.clone();
        if !self.shared.store.save(&config).await {
            return Err(AutomationError::Persist(id));
        }
        self.shared
            .configs
            .write()
            .await
            .insert(id.clone(), config.clone());
        self.shared
            .logs
            .append(&id, Action::Created, "Configuration created", None);
        Ok(config)
    }

    /// Applies `patch`, persists it and swaps the in-memory entry, so a running loop
    /// picks the change up on its next iteration. The record is written before the
    /// config map is locked.
    pub async fn update(
        &self,
        automation_id: &str,
        patch: JobPatch,
    ) -> Result<JobConfig, AutomationError> {
        let current = match self.shared.config(automation_id).await {
            Some(config) => Some(config),
            None => self.shared.store.load(automation_id).await,
        };
        let mut updated =
            current.ok_or_else(|| AutomationError::NotFound(automation_id.to_string()))?;
        patch.apply(&mut updated);
        if !self.shared.store.save(&updated).await {
            return Err(AutomationError::Persist(automation_id.to_string()));
        }
        self.shared
            .configs
            .write()
            .await
            .insert(automation_id.to_string(), updated.clone());
        info!(automation_id, "automation config updated");
        Ok(updated)
    }

    /// Stops the job if needed, then forgets its record, config and history.
    pub async fn delete(&self, automation_id: &str) -> bool {
        self.stop(automation_id).await;
        let had_file = self.shared.store.remove(automation_id).await;
        let had_config = self
            .shared
            .configs
            .write()
            .await
            .remove(automation_id)
            .is_some();
        self.shared.logs.remove(automation_id);
        if !(had_file || had_config) {
            return false;
        }
        self.shared
            .logs
            .append(automation_id, Action::Deleted, "Configuration deleted", None);
        true
    }

    /// `false` when the job is unknown, inactive or already running.
    pub async fn start(&self, automation_id: &str) -> bool {
        let Some(config) = self.shared.config(automation_id).await else {
            return false;
        };
        if !config.active {
            return false;
        }

        let mut running = self.shared.running.lock().await;
        if running.contains_key(automation_id) {
            return false;
        }
        let cancel = CancellationToken::new();
        let run_id = self.shared.next_run_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run_job(
            self.shared.clone(),
            automation_id.to_string(),
            run_id,
            cancel.clone(),
        ));
        running.insert(
            automation_id.to_string(),
            RunningJob {
                run_id,
                cancel,
                handle,
            },
        );
        info!(automation_id, "automation loop spawned");
        true
    }

    /// Signals the loop and forgets its handle without waiting for it to exit.
    pub async fn stop(&self, automation_id: &str) -> bool {
        let Some(job) = self.shared.running.lock().await.remove(automation_id) else {
            return false;
        };
        job.cancel.cancel();
        info!(automation_id, "automation stop requested");
        true
    }

    pub async fn start_all(&self) -> BTreeMap<String, bool> {
        let ids = self.known_ids().await;
        let mut results = BTreeMap::new();
        for id in ids {
            let started = self.start(&id).await;
            results.insert(id, started);
        }
        results
    }

    pub async fn stop_all(&self) -> BTreeMap<String, bool> {
        let ids = self.known_ids().await;
        let mut results = BTreeMap::new();
        for id in ids {
            let stopped = self.stop(&id).await;
            results.insert(id, stopped);
        }
        results
    }

    /// Stops every loop and waits up to `grace` for each to wind down.
    pub async fn shutdown(&self, grace: Duration) {
        let jobs = self
            .shared
            .running
            .lock()
            .await
            .drain()
            .collect::<Vec<_>>();
        for (_, job) in &jobs {
            job.cancel.cancel();
        }
        for (id, job) in jobs {
            if tokio::time::timeout(grace, job.handle).await.is_err() {
                warn!(automation_id = %id, "automation loop still busy at shutdown");
            }
        }
    }

    pub async fn is_running(&self, automation_id: &str) -> bool {
        self.shared
            .running
            .lock()
            .await
            .get(automation_id)
            .is_some_and(|job| !job.handle.is_finished())
    }

    pub async fn status(&self) -> BTreeMap<String, JobStatus> {
        let configs = self.list_configs().await;
        let mut statuses = BTreeMap::new();
        for config in configs {
            let running = self.is_running(&config.automation_id).await;
            let entries = self.shared.logs.entries(&config.automation_id);
            statuses.insert(
                config.automation_id.clone(),
                status::job_status(&config, &entries, running),
            );
        }
        statuses
    }

    pub async fn detailed_status(&self, automation_id: &str) -> Option<DetailedStatus> {
        let config = self.shared.config(automation_id).await?;
        let running = self.is_running(automation_id).await;
        let entries = self.shared.logs.entries(automation_id);
        Some(status::detailed_status(&config, &entries, running))
    }

    pub fn recent_logs(&self, automation_id: &str, n: usize) -> Vec<ActivityLogEntry> {
        self.shared.logs.recent(automation_id, n)
    }

    pub fn logs(&self, automation_id: &str) -> Vec<ActivityLogEntry> {
        self.shared.logs.entries(automation_id)
    }

    async fn known_ids(&self) -> BTreeSet<String> {
        let mut ids = self
            .shared
            .configs
            .read()
            .await
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>();
        ids.extend(self.shared.running.lock().await.keys().cloned());
        ids
    }
}

impl Shared {
    async fn config(&self, automation_id: &str) -> Option<JobConfig> {
        self.configs.read().await.get(automation_id).cloned()
    }

    /// Drops the running handle, unless a newer start already replaced it.
    async fn release(&self, automation_id: &str, run_id: u64) {
        let mut running = self.running.lock().await;
        if running
            .get(automation_id)
            .is_some_and(|job| job.run_id == run_id)
        {
            running.remove(automation_id);
        }
    }

    async fn run_iteration(
        &self,
        config: &JobConfig,
        consecutive_checks: &mut u64,
    ) -> anyhow::Result<IterationOutcome> {
        let id = config.automation_id.as_str();
        let count = self.source.peek_count(&config.agent_group).await?;
        *consecutive_checks += 1;
        self.logs.append(
            id,
            Action::Check,
            format!("Found {count} messages"),
            Some(json!({
                "message_count": count,
                "min_required": config.min_msg_count,
            })),
        );

        match decide(
            count,
            config.min_msg_count,
            *consecutive_checks,
            config.get_msg_minutes,
            config.process_max_time,
        ) {
            Trigger::Skip => return Ok(IterationOutcome::Idle { count }),
            Trigger::Threshold => {}
            Trigger::Timeout { waited_minutes } => self.logs.append(
                id,
                Action::Timeout,
                format!("Processing due to timeout ({waited_minutes} minutes)"),
                Some(json!({ "waited_minutes": waited_minutes, "pending": count })),
            ),
        }

        let messages = self
            .source
            .fetch(&config.agent_group, config.agent_peek_only)
            .await?;
        if messages.is_empty() {
            if count > 0 {
                self.logs.append(
                    id,
                    Action::Warning,
                    "No messages retrieved despite count > 0",
                    Some(json!({ "pending": count })),
                );
            } else {
                debug!(automation_id = id, "nothing to fetch");
            }
            return Ok(IterationOutcome::EmptyFetch { count });
        }

        self.logs.append(
            id,
            Action::Process,
            format!("Processing {} messages", messages.len()),
            Some(json!({
                "message_count": messages.len(),
                "messages": messages,
            })),
        );
        let mut succeeded = 0;
        for prompt_type in &config.prompts {
            if self.run_prompt(id, &messages, prompt_type).await {
                succeeded += 1;
            }
        }
        *consecutive_checks = 0;
        Ok(IterationOutcome::Processed {
            messages: messages.len(),
            succeeded,
            failed: config.prompts.len() - succeeded,
        })
    }

    /// Extracts and saves one prompt type. Failures are logged, never propagated.
    async fn run_prompt(&self, id: &str, messages: &[Message], prompt_type: &str) -> bool {
        let extracted = AssertUnwindSafe(self.extractor.extract(messages, prompt_type))
            .catch_unwind()
            .await;
        let result = match extracted {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                self.prompt_failed(
                    id,
                    prompt_type,
                    format!("Failed to process with {prompt_type}: {err}"),
                );
                return false;
            }
            Err(panic) => {
                let reason = panic_message(panic);
                self.prompt_failed(
                    id,
                    prompt_type,
                    format!("Failed to process with {prompt_type}: {reason}"),
                );
                return false;
            }
        };

        match self.sink.save(&result).await {
            Ok(saved_ids) => {
                self.logs.append(
                    id,
                    Action::Processed,
                    format!("Processed with {prompt_type}"),
                    Some(json!({
                        "prompt_type": prompt_type,
                        "result_count": result.item_count(),
                        "saved_ids": saved_ids,
                        "result": result,
                    })),
                );
                true
            }
            Err(err) => {
                self.prompt_failed(
                    id,
                    prompt_type,
                    format!("Failed to save {prompt_type} results: {err:#}"),
                );
                false
            }
        }
    }

    fn prompt_failed(&self, id: &str, prompt_type: &str, message: String) {
        self.logs.append(
            id,
            Action::Error,
            message,
            Some(json!({ "prompt_type": prompt_type })),
        );
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic without message".to_string())
}

async fn run_job(shared: Arc<Shared>, id: String, run_id: u64, cancel: CancellationToken) {
    if let Some(config) = shared.config(&id).await {
        shared.logs.append(
            &id,
            Action::Started,
            "Automation job started",
            Some(json!({ "config": config })),
        );
    }

    let mut consecutive_checks = 0u64;
    loop {
        let Some(config) = shared.config(&id).await.filter(|c| c.active) else {
            debug!(automation_id = %id, "job deleted or deactivated");
            break;
        };
        if cancel.is_cancelled() {
            break;
        }

        let outcome = AssertUnwindSafe(shared.run_iteration(&config, &mut consecutive_checks))
            .catch_unwind()
            .await;
        let pause = match outcome {
            Ok(Ok(outcome)) => {
                debug!(automation_id = %id, ?outcome, consecutive_checks, "iteration done");
                shared.options.interval(config.get_msg_minutes)
            }
            Ok(Err(err)) => {
                shared.logs.append(
                    &id,
                    Action::Error,
                    format!("Automation error: {err:#}"),
                    None,
                );
                shared.options.error_backoff
            }
            Err(panic) => {
                shared.logs.append(
                    &id,
                    Action::Error,
                    format!("Automation error: {}", panic_message(panic)),
                    None,
                );
                shared.options.error_backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    {
        // Held across the append so a concurrent delete either sees the entry and
        // clears it, or has already dropped the config.
        let configs = shared.configs.read().await;
        if configs.contains_key(&id) {
            shared
                .logs
                .append(&id, Action::Stopped, "Automation job stopped", None);
        } else {
            debug!(automation_id = %id, "job deleted, loop exiting");
        }
    }
    shared.release(&id, run_id).await;
}
