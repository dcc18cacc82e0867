//! Deterministic scheduler
//!
//! Runs scheduled drain tasks only when the test ticks them, so sample
//! delivery and message dispatch happen at known points instead of on a
//! timer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trunk_engine::{ScheduleError, Scheduler, Task, TaskId};

#[derive(Default)]
struct ManualInner {
    next_id: u64,
    tasks: HashMap<TaskId, Task>,
    periods: HashMap<TaskId, Duration>,
    cancelled: HashSet<TaskId>,
    reject_next: Option<String>,
}

/// A scheduler whose tasks run only on explicit ticks
///
/// Tasks may schedule and cancel through the same handle while they run;
/// the lock is released around each task invocation.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualScheduler {
    /// An empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().expect("manual scheduler lock")
    }

    /// Reject the next scheduling request with the given reason
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    /// Number of live scheduled tasks
    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// The period a task was scheduled with
    pub fn period_of(&self, id: TaskId) -> Option<Duration> {
        self.lock().periods.get(&id).copied()
    }

    /// Run one task once, if it is still scheduled
    pub fn tick(&self, id: TaskId) {
        let task = self.lock().tasks.remove(&id);
        let Some(mut task) = task else { return };
        task();
        let mut inner = self.lock();
        if inner.cancelled.remove(&id) {
            inner.periods.remove(&id);
        } else {
            inner.tasks.insert(id, task);
        }
    }

    /// Run every live task once
    pub fn tick_all(&self) {
        let ids: Vec<TaskId> = self.lock().tasks.keys().copied().collect();
        for id in ids {
            self.tick(id);
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_fixed_rate(&self, period: Duration, task: Task) -> Result<TaskId, ScheduleError> {
        let mut inner = self.lock();
        if let Some(reason) = inner.reject_next.take() {
            return Err(ScheduleError::Rejected(reason));
        }
        inner.next_id += 1;
        let id = TaskId(inner.next_id);
        inner.tasks.insert(id, task);
        inner.periods.insert(id, period);
        Ok(id)
    }

    fn cancel(&self, id: TaskId) {
        let mut inner = self.lock();
        if inner.tasks.remove(&id).is_none() {
            // Mid-run cancellation; drop the task when its tick returns
            inner.cancelled.insert(id);
        } else {
            inner.periods.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_run_only_when_ticked() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = Arc::clone(&count);

        let id = scheduler
            .schedule_fixed_rate(
                Duration::from_millis(50),
                Box::new(move || {
                    task_count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.tick_all();
        scheduler.tick_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.cancel(id);
        scheduler.tick_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn rejection_applies_to_one_request() {
        let scheduler = ManualScheduler::new();
        scheduler.reject_next("saturated");

        assert!(scheduler
            .schedule_fixed_rate(Duration::from_millis(50), Box::new(|| {}))
            .is_err());
        assert!(scheduler
            .schedule_fixed_rate(Duration::from_millis(50), Box::new(|| {}))
            .is_ok());
    }

    #[test]
    fn a_task_can_schedule_another_while_running() {
        let scheduler = ManualScheduler::new();
        let nested = scheduler.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let nested_count = Arc::clone(&count);

        scheduler
            .schedule_fixed_rate(
                Duration::from_millis(50),
                Box::new(move || {
                    let inner_count = Arc::clone(&nested_count);
                    let _ = nested.schedule_fixed_rate(
                        Duration::from_millis(50),
                        Box::new(move || {
                            inner_count.fetch_add(1, Ordering::SeqCst);
                        }),
                    );
                }),
            )
            .unwrap();

        scheduler.tick_all();
        assert_eq!(scheduler.task_count(), 2);
        scheduler.tick_all();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
