use crate::automation::types::{Action, ActivityLogEntry};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

pub const LOG_RETENTION_HOURS: i64 = 2;

/// Per-job activity history kept for a sliding retention window.
///
/// Entries are only pruned when a new entry is appended for the same job, so a job
/// that has gone quiet keeps its last entries until it logs again.
pub struct ActivityLog {
    retention: Duration,
    entries: Mutex<HashMap<String, Vec<ActivityLogEntry>>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(Duration::hours(LOG_RETENTION_HOURS))
    }
}

impl ActivityLog {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ActivityLogEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(
        &self,
        automation_id: &str,
        action: Action,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        self.append_at(Utc::now(), automation_id, action, message, details);
    }

    pub fn append_at(
        &self,
        at: DateTime<Utc>,
        automation_id: &str,
        action: Action,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        let message = message.into();
        info!(automation_id, %action, "{message}");
        let entry = ActivityLogEntry {
            timestamp: at,
            automation_id: automation_id.to_string(),
            action,
            message,
            details,
        };

        let cutoff = at - self.retention;
        let mut entries = self.lock();
        let log = entries.entry(automation_id.to_string()).or_default();
        log.push(entry);
        log.retain(|e| e.timestamp > cutoff);
    }

    pub fn entries(&self, automation_id: &str) -> Vec<ActivityLogEntry> {
        self.lock().get(automation_id).cloned().unwrap_or_default()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, automation_id: &str, n: usize) -> Vec<ActivityLogEntry> {
        let entries = self.lock();
        let Some(log) = entries.get(automation_id) else {
            return Vec::new();
        };
        log[log.len().saturating_sub(n)..].to_vec()
    }

    pub fn remove(&self, automation_id: &str) {
        self.lock().remove(automation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recent_returns_tail_in_insertion_order() {
        let log = ActivityLog::default();
        for n in 0..5 {
            log.append("job", Action::Check, format!("check {n}"), Some(json!({"message_count": n})));
        }
        log.append("other", Action::Created, "Configuration created", None);

        let recent = log.recent("job", 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "check 3");
        assert_eq!(recent[1].message, "check 4");
        assert_eq!(recent[1].detail_count("message_count"), 4);
        assert_eq!(log.entries("job").len(), 5);
        assert_eq!(log.entries("other").len(), 1);
        assert!(log.recent("missing", 10).is_empty());
    }

    #[test]
    fn expired_entries_survive_until_next_append() {
        let log = ActivityLog::default();
        let old = Utc::now() - Duration::hours(2) - Duration::minutes(1);
        log.append_at(old, "job", Action::Check, "old check", None);

        // Reads never prune.
        assert_eq!(log.recent("job", 10).len(), 1);

        log.append("other", Action::Check, "unrelated job", None);
        assert_eq!(log.recent("job", 10).len(), 1);

        log.append("job", Action::Check, "fresh check", None);
        let remaining = log.entries("job");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "fresh check");
    }

    #[test]
    fn entries_inside_window_are_kept() {
        let log = ActivityLog::default();
        let recent = Utc::now() - Duration::minutes(119);
        log.append_at(recent, "job", Action::Check, "still fresh", None);
        log.append("job", Action::Check, "now", None);
        assert_eq!(log.entries("job").len(), 2);
    }

    #[test]
    fn remove_forgets_the_job() {
        let log = ActivityLog::default();
        log.append("job", Action::Created, "Configuration created", None);
        log.remove("job");
        assert!(log.entries("job").is_empty());
    }
}
