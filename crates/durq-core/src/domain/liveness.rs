//! Liveness of a peer instance, as observed through the shared store.

use serde::{Deserialize, Serialize};

use super::ids::InstanceId;
use crate::ports::Timestamp;

/// Liveness fields of one instance's record set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub ack: Option<Timestamp>,
    pub reclaim_start: Option<InstanceId>,
    pub reclaim_end: Option<InstanceId>,
}

/// Observed state of a peer.
///
/// State transitions (seen from a reclaiming peer):
/// - Alive -> Suspect (ack went stale)
/// - Suspect -> Claimed(X) -> Confirmed(X) -> record deleted
/// - any -> Alive when the peer heartbeats again (it clears both markers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Suspect,
    Claimed(InstanceId),
    Confirmed(InstanceId),
}

impl LivenessRecord {
    /// Classify this record at `now`.
    ///
    /// A missing ack counts as stale. A claim in flight refreshes the ack, so
    /// `Claimed`/`Confirmed` are reported whenever the markers are present,
    /// regardless of ack age.
    pub fn observe(&self, now: Timestamp, reclaim_timeout: Timestamp) -> Liveness {
        match (&self.reclaim_start, &self.reclaim_end) {
            (Some(start), Some(end)) if start == end => Liveness::Confirmed(start.clone()),
            (Some(start), _) => Liveness::Claimed(start.clone()),
            _ if self.is_stale(now, reclaim_timeout) => Liveness::Suspect,
            _ => Liveness::Alive,
        }
    }

    /// Whether the heartbeat is older than `reclaim_timeout`.
    pub fn is_stale(&self, now: Timestamp, reclaim_timeout: Timestamp) -> bool {
        match self.ack {
            Some(ack) => now.saturating_sub(ack) >= reclaim_timeout,
            None => true,
        }
    }
}
