use crate::automation::types::{Action, ActivityLogEntry, JobConfig};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const RECENT_LOG_LIMIT: usize = 10;

/// Aggregate view of one job, derived from its config and activity log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub automation_id: String,
    pub active: bool,
    pub is_running: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_process: Option<DateTime<Utc>>,
    pub next_trigger: Option<DateTime<Utc>>,
    pub messages_checked: u64,
    pub messages_processed: u64,
    pub errors_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigView {
    pub owner: String,
    pub customer_id: String,
    pub agent_group: String,
    pub prompts: Vec<String>,
    pub get_msg_minutes: u64,
    pub min_msg_count: i64,
    pub process_max_time: u64,
    pub agent_peek_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBlock {
    pub active: bool,
    pub is_running: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub next_trigger: Option<DateTime<Utc>>,
    pub last_process: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_checks: u64,
    pub total_processes: u64,
    pub total_errors: u64,
    pub messages_checked: u64,
    pub messages_processed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedStatus {
    pub automation_id: String,
    pub config: ConfigView,
    pub status: StatusBlock,
    pub statistics: Statistics,
    pub recent_logs: Vec<ActivityLogEntry>,
}

/// `None` while the job is inactive or has never been checked.
pub fn next_trigger(config: &JobConfig, last_check: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    if !config.active {
        return None;
    }
    let minutes = i64::try_from(config.get_msg_minutes).ok()?;
    last_check?.checked_add_signed(Duration::try_minutes(minutes)?)
}

fn last_of(entries: &[ActivityLogEntry], action: Action) -> Option<DateTime<Utc>> {
    entries
        .iter()
        .rev()
        .find(|e| e.action == action)
        .map(|e| e.timestamp)
}

pub fn statistics(entries: &[ActivityLogEntry]) -> Statistics {
    let mut stats = Statistics::default();
    for entry in entries {
        match entry.action {
            Action::Check => {
                stats.total_checks += 1;
                stats.messages_checked += entry.detail_count("message_count");
            }
            Action::Processed => {
                stats.total_processes += 1;
                stats.messages_processed += entry.detail_count("result_count");
            }
            Action::Error => stats.total_errors += 1,
            _ => {}
        }
    }
    stats
}

pub fn job_status(config: &JobConfig, entries: &[ActivityLogEntry], is_running: bool) -> JobStatus {
    let stats = statistics(entries);
    let last_check = last_of(entries, Action::Check);
    JobStatus {
        automation_id: config.automation_id.clone(),
        active: config.active,
        is_running,
        last_check,
        last_process: last_of(entries, Action::Processed),
        next_trigger: next_trigger(config, last_check),
        messages_checked: stats.messages_checked,
        messages_processed: stats.messages_processed,
        errors_count: stats.total_errors,
    }
}

pub fn detailed_status(
    config: &JobConfig,
    entries: &[ActivityLogEntry],
    is_running: bool,
) -> DetailedStatus {
    let last_check = last_of(entries, Action::Check);
    DetailedStatus {
        automation_id: config.automation_id.clone(),
        config: ConfigView {
            owner: config.owner.clone(),
            customer_id: config.customer_id.clone(),
            agent_group: config.agent_group.clone(),
            prompts: config.prompts.clone(),
            get_msg_minutes: config.get_msg_minutes,
            min_msg_count: config.min_msg_count,
            process_max_time: config.process_max_time,
            agent_peek_only: config.agent_peek_only,
        },
        status: StatusBlock {
            active: config.active,
            is_running,
            last_check,
            next_trigger: next_trigger(config, last_check),
            last_process: last_of(entries, Action::Processed),
        },
        statistics: statistics(entries),
        recent_logs: entries[entries.len().saturating_sub(RECENT_LOG_LIMIT)..].to_vec(),
    }
}
