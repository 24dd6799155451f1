//! Persisted queue and in-progress entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::ClaimId;
use crate::ports::Timestamp;

/// One unit of work waiting in an instance's persisted queue.
///
/// `time` is the earliest moment the entry may run. `id` is an optional
/// caller-supplied dedup token, only consulted when work is reclaimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry<T> {
    pub item: T,
    pub attempt_number: u32,
    pub time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl<T> QueueEntry<T> {
    pub fn new(item: T, attempt_number: u32, time: Timestamp) -> Self {
        Self {
            item,
            attempt_number,
            time,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Move this entry into the in-progress set, claimed at `now`.
    pub fn claim(self, now: Timestamp) -> InProgressEntry<T> {
        InProgressEntry {
            item: self.item,
            attempt_number: self.attempt_number,
            time: now,
            id: self.id,
        }
    }
}

/// Work handed to the processor but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgressEntry<T> {
    pub item: T,
    pub attempt_number: u32,
    /// When the entry was claimed.
    pub time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// In-progress entries keyed by claim id.
pub type InProgressMap<T> = BTreeMap<ClaimId, InProgressEntry<T>>;

/// Stable sort by eligibility time; equal times keep insertion order.
pub fn sort_by_time<T>(queue: &mut [QueueEntry<T>]) {
    queue.sort_by_key(|entry| entry.time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_uses_camel_case_and_omits_missing_id() {
        let entry = QueueEntry::new("a", 2, 1000);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"item": "a", "attemptNumber": 2, "time": 1000}));
    }

    #[test]
    fn entry_reads_records_without_id() {
        let entry: QueueEntry<String> =
            serde_json::from_value(json!({"item": "a", "attemptNumber": 0, "time": 0})).unwrap();

        assert_eq!(entry.id, None);
        assert_eq!(entry.item, "a");
    }

    #[test]
    fn sort_is_stable_for_equal_times() {
        let mut queue = vec![
            QueueEntry::new("late", 0, 5),
            QueueEntry::new("first", 0, 1),
            QueueEntry::new("second", 0, 1),
        ];

        sort_by_time(&mut queue);

        let items: Vec<_> = queue.iter().map(|e| e.item).collect();
        assert_eq!(items, vec!["first", "second", "late"]);
    }

    #[test]
    fn claim_keeps_dedup_id_and_restamps_time() {
        let claimed = QueueEntry::new("a", 3, 10).with_id("x").claim(99);

        assert_eq!(claimed.time, 99);
        assert_eq!(claimed.attempt_number, 3);
        assert_eq!(claimed.id.as_deref(), Some("x"));
    }
}
