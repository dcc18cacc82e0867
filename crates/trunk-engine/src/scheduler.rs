//! Fixed-rate task scheduling
//!
//! Each pipeline receives a scheduler service at construction instead of
//! reaching into a global thread pool, so tests can substitute a
//! deterministic implementation that ticks tasks manually.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A periodic unit of work
pub type Task = Box<dyn FnMut() + Send>;

/// Token identifying a scheduled task, used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Errors raised when a task cannot be scheduled
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The scheduler refused the task (shut down or saturated)
    #[error("scheduler rejected task: {0}")]
    Rejected(String),
}

/// A service that runs tasks at a fixed rate until cancelled
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run every `period`; the first run happens one
    /// period after scheduling
    fn schedule_fixed_rate(&self, period: Duration, task: Task) -> Result<TaskId, ScheduleError>;

    /// Cancel a scheduled task; unknown ids are ignored
    ///
    /// A run already in progress completes; no run starts afterwards.
    fn cancel(&self, task: TaskId);
}

#[derive(Default)]
struct TokioSchedulerInner {
    next_id: u64,
    tasks: HashMap<TaskId, tokio::task::JoinHandle<()>>,
    closed: bool,
}

/// Production scheduler backed by a tokio runtime
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    inner: Mutex<TokioSchedulerInner>,
}

impl TokioScheduler {
    /// Create a scheduler that spawns tasks on the given runtime handle
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            inner: Mutex::new(TokioSchedulerInner::default()),
        }
    }

    /// Create a scheduler on the current tokio runtime
    pub fn current() -> Result<Self, ScheduleError> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| ScheduleError::Rejected(e.to_string()))
    }

    /// Abort every scheduled task and reject all future scheduling
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("scheduler lock");
        inner.closed = true;
        for (id, handle) in inner.tasks.drain() {
            debug!("aborting scheduled {id}");
            handle.abort();
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_fixed_rate(
        &self,
        period: Duration,
        mut task: Task,
    ) -> Result<TaskId, ScheduleError> {
        let mut inner = self.inner.lock().expect("scheduler lock");
        if inner.closed {
            return Err(ScheduleError::Rejected("scheduler is shut down".into()));
        }

        inner.next_id += 1;
        let id = TaskId(inner.next_id);

        let join = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it so the
            // first run lands one period after scheduling.
            interval.tick().await;
            loop {
                interval.tick().await;
                task();
            }
        });

        inner.tasks.insert(id, join);
        Ok(id)
    }

    fn cancel(&self, task: TaskId) {
        let mut inner = self.inner.lock().expect("scheduler lock");
        if let Some(handle) = inner.tasks.remove(&task) {
            handle.abort();
        }
    }
}
