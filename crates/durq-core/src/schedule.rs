//! Scheduler: one instance's delayed tasks on top of an injected `Clock`.
//!
//! Every task the engine arms goes through here, so `cancel_all` can tear an
//! instance down completely. Tasks may opt into a late-task policy: when a
//! task fires more than `delay * late_factor` after it was armed (for example
//! after the process was suspended), it is either dropped or re-armed for
//! another full delay instead of running.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::ports::clock::duration_millis;
use crate::ports::{Clock, TimerCallback, TimerId, Timestamp};

/// Default late factor used by the engine.
pub const CLOCK_LATE_FACTOR: u32 = 2;

/// Handle of one scheduled task. Stable across reschedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

/// What to do with a task that fires late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatePolicy {
    /// Run regardless of lateness.
    #[default]
    Run,
    /// Drop the callback.
    Abandon,
    /// Re-arm for another full delay.
    Reschedule,
}

#[derive(Clone)]
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    tasks: Arc<Mutex<Tasks>>,
    late_factor: u32,
}

#[derive(Default)]
struct Tasks {
    /// Armed tasks. `None` while the clock timer is being registered.
    armed: HashMap<TaskHandle, Option<TimerId>>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tasks: Arc::new(Mutex::new(Tasks::default())),
            late_factor: CLOCK_LATE_FACTOR,
        }
    }

    pub fn with_late_factor(mut self, late_factor: u32) -> Self {
        self.late_factor = late_factor.max(1);
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run `callback` once after `delay`.
    pub fn run(&self, callback: impl FnOnce() + Send + 'static, delay: Duration) -> TaskHandle {
        self.run_with(callback, delay, LatePolicy::Run)
    }

    /// Run `callback` once after `delay`, applying `policy` if it fires late.
    pub fn run_with(
        &self,
        callback: impl FnOnce() + Send + 'static,
        delay: Duration,
        policy: LatePolicy,
    ) -> TaskHandle {
        let handle = {
            let mut tasks = self.tasks.lock();
            tasks.next_id += 1;
            TaskHandle(tasks.next_id)
        };
        self.arm(handle, Box::new(callback), delay, policy);
        handle
    }

    /// Cancel one task. Unknown, fired or cancelled handles are ignored.
    pub fn cancel(&self, handle: TaskHandle) {
        let removed = self.tasks.lock().armed.remove(&handle);
        if let Some(Some(timer)) = removed {
            self.clock.clear_timeout(timer);
        }
    }

    /// Cancel every pending task owned by this scheduler.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.tasks.lock().armed.drain().collect();
        for timer in drained.into_iter().filter_map(|(_, timer)| timer) {
            self.clock.clear_timeout(timer);
        }
    }

    /// Number of armed tasks.
    pub fn pending(&self) -> usize {
        self.tasks.lock().armed.len()
    }

    fn arm(&self, handle: TaskHandle, callback: TimerCallback, delay: Duration, policy: LatePolicy) {
        self.tasks.lock().armed.insert(handle, None);

        let start = self.now();
        let deadline = start.saturating_add(
            duration_millis(delay).saturating_mul(Timestamp::from(self.late_factor)),
        );
        let tasks = Arc::downgrade(&self.tasks);
        let clock = Arc::clone(&self.clock);
        let late_factor = self.late_factor;

        let timer = self.clock.set_timeout(
            Box::new(move || {
                let Some(scheduler) = Scheduler::revive(tasks, clock, late_factor) else {
                    return;
                };
                if scheduler.tasks.lock().armed.remove(&handle).is_none() {
                    return;
                }
                let now = scheduler.now();
                if deadline < now {
                    match policy {
                        LatePolicy::Run => {}
                        LatePolicy::Abandon => {
                            debug!(?handle, late_by = now - deadline, "abandoning late task");
                            return;
                        }
                        LatePolicy::Reschedule => {
                            debug!(?handle, late_by = now - deadline, "rescheduling late task");
                            scheduler.arm(handle, callback, delay, policy);
                            return;
                        }
                    }
                }
                drop(scheduler);
                callback();
            }),
            delay,
        );

        // the timer may already have fired (zero delay on a threaded clock)
        if let Some(slot) = self.tasks.lock().armed.get_mut(&handle) {
            *slot = Some(timer);
        }
    }

    fn revive(tasks: Weak<Mutex<Tasks>>, clock: Arc<dyn Clock>, late_factor: u32) -> Option<Self> {
        Some(Self {
            clock,
            tasks: tasks.upgrade()?,
            late_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::VirtualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn setup() -> (Arc<VirtualClock>, Scheduler, Arc<AtomicUsize>) {
        let clock = Arc::new(VirtualClock::new(0));
        let scheduler = Scheduler::new(clock.clone());
        (clock, scheduler, Arc::new(AtomicUsize::new(0)))
    }

    fn spy(count: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn calls_task_after_timeout() {
        let (clock, scheduler, count) = setup();
        scheduler.run(spy(&count), TIMEOUT);

        clock.tick(499);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        clock.tick(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn calls_task_after_timeout_even_after_long_duration() {
        let (clock, scheduler, count) = setup();
        scheduler.run(spy(&count), TIMEOUT);

        clock.set_system_time(1000);
        clock.tick(500);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abandons_task_past_late_factor() {
        let (clock, scheduler, count) = setup();
        scheduler.run_with(spy(&count), TIMEOUT, LatePolicy::Abandon);

        // fast-forward wall time without firing timers, then fire them
        clock.set_system_time(1000);
        clock.tick(500);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        clock.tick(500);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn reschedules_late_task_for_another_full_delay() {
        let (clock, scheduler, count) = setup();
        scheduler.run_with(spy(&count), TIMEOUT, LatePolicy::Reschedule);

        clock.set_system_time(1000);
        clock.tick(500);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);

        clock.tick(500);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rescheduled_task_keeps_its_handle() {
        let (clock, scheduler, count) = setup();
        let handle = scheduler.run_with(spy(&count), TIMEOUT, LatePolicy::Reschedule);

        clock.set_system_time(1000);
        clock.tick(500);
        scheduler.cancel(handle);
        clock.tick(5_000);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_prevents_the_callback() {
        let (clock, scheduler, count) = setup();
        let handle = scheduler.run(spy(&count), TIMEOUT);

        scheduler.cancel(handle);
        clock.tick(1_000);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn cancel_of_fired_or_unknown_handle_is_a_no_op() {
        let (clock, scheduler, count) = setup();
        let handle = scheduler.run(spy(&count), TIMEOUT);
        clock.tick(500);

        scheduler.cancel(handle);
        scheduler.cancel(handle);
        scheduler.cancel(TaskHandle(9_999));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_all_clears_every_pending_task() {
        let (clock, scheduler, count) = setup();
        scheduler.run(spy(&count), TIMEOUT);
        scheduler.run(spy(&count), TIMEOUT * 2);
        scheduler.run_with(spy(&count), TIMEOUT * 3, LatePolicy::Abandon);

        scheduler.cancel_all();
        scheduler.cancel_all();
        clock.tick(10_000);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn dropped_scheduler_turns_timers_into_no_ops() {
        let (clock, scheduler, count) = setup();
        scheduler.run(spy(&count), TIMEOUT);

        drop(scheduler);
        clock.tick(1_000);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_can_schedule_more_work() {
        let (clock, scheduler, count) = setup();
        let inner = scheduler.clone();
        let inner_count = Arc::clone(&count);
        scheduler.run(
            move || {
                inner.run(spy(&inner_count), TIMEOUT);
            },
            TIMEOUT,
        );

        clock.tick(1_000);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
