/// Why an iteration goes on to fetch and extract, if it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Skip,
    /// The backlog reached `min_msg_count`.
    Threshold,
    /// A small backlog has waited `waited_minutes` (>= `process_max_time`).
    Timeout { waited_minutes: u64 },
}

impl Trigger {
    pub fn fires(self) -> bool {
        !matches!(self, Trigger::Skip)
    }
}

/// `consecutive_checks` includes the check that observed `count`.
pub fn decide(
    count: usize,
    min_msg_count: i64,
    consecutive_checks: u64,
    get_msg_minutes: u64,
    process_max_time: u64,
) -> Trigger {
    let count_i64 = i64::try_from(count).unwrap_or(i64::MAX);
    if count_i64 >= min_msg_count {
        return Trigger::Threshold;
    }
    let waited_minutes = consecutive_checks.saturating_mul(get_msg_minutes);
    if count > 0 && waited_minutes >= process_max_time {
        return Trigger::Timeout { waited_minutes };
    }
    Trigger::Skip
}
