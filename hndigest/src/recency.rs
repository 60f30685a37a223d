use chrono::Duration;
use std::collections::HashSet;

use crate::model::CandidateItem;

pub const DEFAULT_RECENCY_WINDOW_DAYS: i64 = 7;

pub fn default_window() -> Duration {
    Duration::days(DEFAULT_RECENCY_WINDOW_DAYS)
}

/// Drop candidates already delivered inside the recency window, keeping feed order.
pub fn filter_recent(candidates: Vec<CandidateItem>, sent_ids: &HashSet<i64>) -> Vec<CandidateItem> {
    candidates
        .into_iter()
        .filter(|c| !sent_ids.contains(&c.id))
        .collect()
}
