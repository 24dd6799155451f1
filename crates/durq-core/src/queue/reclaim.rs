//! Reclaim helpers: reading a peer's liveness and folding its work into ours.
//!
//! The handshake itself lives on the engine, since every phase is a timer.

use std::collections::HashSet;

use crate::domain::{InProgressEntry, LivenessRecord, QueueEntry};
use crate::ports::Timestamp;
use crate::store::{Field, NamespacedStore};

/// Read the liveness fields of one record set.
pub fn read_liveness(store: &NamespacedStore) -> LivenessRecord {
    LivenessRecord {
        ack: store.get(Field::Ack),
        reclaim_start: store.get(Field::ReclaimStart),
        reclaim_end: store.get(Field::ReclaimEnd),
    }
}

/// Append a peer's queued and in-progress entries to `ours`.
///
/// Adopted entries restart from attempt 0 and become eligible at `now`.
/// An entry whose `id` is already in `ours` (or was adopted earlier in the
/// same merge) is dropped; entries without an `id` are always adopted.
/// Returns the number of adopted entries. The caller re-sorts `ours`.
pub fn merge_entries<T>(
    ours: &mut Vec<QueueEntry<T>>,
    queued: impl IntoIterator<Item = QueueEntry<T>>,
    in_progress: impl IntoIterator<Item = InProgressEntry<T>>,
    now: Timestamp,
) -> usize {
    let mut known: HashSet<String> = ours.iter().filter_map(|e| e.id.clone()).collect();
    let theirs = queued
        .into_iter()
        .map(|e| (e.item, e.id))
        .chain(in_progress.into_iter().map(|e| (e.item, e.id)));

    let mut adopted = 0;
    for (item, id) in theirs {
        if id.as_ref().is_some_and(|id| !known.insert(id.clone())) {
            continue;
        }
        ours.push(QueueEntry {
            item,
            attempt_number: 0,
            time: now,
            id,
        });
        adopted += 1;
    }
    adopted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstanceId;
    use crate::impls::InMemoryBackend;
    use std::sync::Arc;

    fn in_progress(item: &'static str, id: Option<&str>) -> InProgressEntry<&'static str> {
        InProgressEntry {
            item,
            attempt_number: 4,
            time: 1,
            id: id.map(str::to_string),
        }
    }

    #[test]
    fn adopted_entries_reset_attempts_and_time() {
        let mut ours = vec![QueueEntry::new("mine", 2, 50)];

        let adopted = merge_entries(
            &mut ours,
            vec![QueueEntry::new("queued", 3, 9_000)],
            vec![in_progress("running", None)],
            100,
        );

        assert_eq!(adopted, 2);
        assert_eq!(
            ours,
            vec![
                QueueEntry::new("mine", 2, 50),
                QueueEntry::new("queued", 0, 100),
                QueueEntry::new("running", 0, 100),
            ]
        );
    }

    #[test]
    fn ids_already_queued_are_dropped() {
        let mut ours = vec![QueueEntry::new("mine", 0, 0).with_id("x")];

        let adopted = merge_entries(
            &mut ours,
            vec![QueueEntry::new("dup", 1, 0).with_id("x")],
            vec![in_progress("fresh", Some("y"))],
            10,
        );

        assert_eq!(adopted, 1);
        let items: Vec<_> = ours.iter().map(|e| e.item).collect();
        assert_eq!(items, vec!["mine", "fresh"]);
    }

    #[test]
    fn ids_repeated_within_one_merge_collapse() {
        let mut ours = Vec::new();

        merge_entries(
            &mut ours,
            vec![QueueEntry::new("queued", 0, 0).with_id("x")],
            vec![in_progress("running", Some("x"))],
            10,
        );

        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].item, "queued");
        assert_eq!(ours[0].id.as_deref(), Some("x"));
    }

    #[test]
    fn entries_without_id_never_collapse() {
        let mut ours = vec![QueueEntry::new("same", 0, 0)];

        let adopted = merge_entries(
            &mut ours,
            vec![QueueEntry::new("same", 0, 0), QueueEntry::new("same", 0, 0)],
            vec![in_progress("same", None)],
            0,
        );

        assert_eq!(adopted, 3);
        assert_eq!(ours.len(), 4);
    }

    #[test]
    fn read_liveness_reads_markers() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = NamespacedStore::peer("q", InstanceId::from("peer"), backend.clone());
        store.set(Field::Ack, &1_234_i64);
        store.set(Field::ReclaimStart, &InstanceId::from("me"));

        let record = read_liveness(&store);

        assert_eq!(record.ack, Some(1_234));
        assert_eq!(record.reclaim_start, Some(InstanceId::from("me")));
        assert_eq!(record.reclaim_end, None);
    }
}
