//! Domain model (ids, persisted entries, liveness, events).

pub mod entry;
pub mod events;
pub mod ids;
pub mod liveness;

pub use self::entry::{InProgressEntry, InProgressMap, QueueEntry, sort_by_time};
pub use self::events::QueueEvent;
pub use self::ids::{ClaimId, InstanceId};
pub use self::liveness::{Liveness, LivenessRecord};
