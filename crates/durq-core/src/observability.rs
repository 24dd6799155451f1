use serde::{Deserialize, Serialize};

/// Sizes of one instance's persisted queue and in-progress set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub in_progress: usize,
}

impl QueueCounts {
    /// Entries this instance still owns, waiting or running.
    pub fn total(&self) -> usize {
        self.queued + self.in_progress
    }
}
