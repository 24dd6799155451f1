//! Engine state machine for one queue instance.

use serde::{Deserialize, Serialize};

/// Engine state.
///
/// State transitions:
/// - Stopped -> Running (start)
/// - Running -> Stopped (stop)
/// - Running -> Running (start while running restarts every timer)
///
/// While stopped the engine still accepts items and completions; it only
/// stops scheduling work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// No timers armed.
    #[default]
    Stopped,

    /// Heartbeat, reclaim scan and head processing are scheduled.
    Running,
}

impl EngineState {
    pub fn is_running(self) -> bool {
        matches!(self, EngineState::Running)
    }
}
