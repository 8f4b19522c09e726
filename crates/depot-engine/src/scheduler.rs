//! The asynchronous task scheduler.
//!
//! Submissions land in a bounded queue; a dispatcher claims a worker
//! permit before pulling the next task, so queued tasks stay queued
//! while every worker is busy and a full queue rejects new work with
//! [`EngineError::Overloaded`]. Each task reports its state through a
//! watch channel and carries a cancellation flag that the executing job
//! checks at its suspension points.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use depot_core::PackageId;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, warn};

use crate::{
    error::{EngineError, ErrorKind, Result},
    SnapshotId,
};

pub type TaskId = u64;

/// The work a task performs.
pub enum TaskKind {
    /// Ingest an archive and publish it into a section.
    Publish {
        section: String,
        archive: Arc<Vec<u8>>,
        principal: String,
    },
    /// Retire a package from a section.
    Remove {
        section: String,
        id: PackageId,
        principal: String,
    },
    /// Re-hash a published package's stored content.
    Verify { section: String, id: PackageId },
}

impl TaskKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TaskKind::Publish { .. } => "publish",
            TaskKind::Remove { .. } => "remove",
            TaskKind::Verify { .. } => "verify",
        }
    }
}

/// Observable lifecycle of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    /// Parked at a suspension point (blocking I/O, retry backoff).
    Suspended,
    /// Finished; the snapshot sequence the task's effects are visible at.
    Completed(SnapshotId),
    Failed {
        kind: ErrorKind,
        detail: String,
    },
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed(_) | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }
}

/// Cooperative cancellation flag, checked by jobs at suspension points.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handed to a job so it can report suspension and observe cancellation.
pub struct TaskSignals {
    cancel: CancelToken,
    state: Arc<watch::Sender<TaskState>>,
}

impl TaskSignals {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Marks the task parked at a suspension point.
    pub fn suspend(&self) {
        let _ = self.state.send(TaskState::Suspended);
    }

    /// Marks the task running again after a suspension.
    pub fn resume(&self) {
        let _ = self.state.send(TaskState::Running);
    }
}

/// How a job ended, short of an error.
#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The task's effects are visible at this snapshot sequence.
    Completed(SnapshotId),
    /// The job observed its cancellation flag and stopped cleanly.
    Cancelled,
}

pub type JobFuture = Pin<Box<dyn Future<Output = Result<JobOutcome>> + Send>>;

/// Executes one task. The engine's pipeline is the production
/// implementation; tests substitute their own.
pub trait Job: Send + Sync + 'static {
    fn run(&self, kind: TaskKind, signals: TaskSignals) -> JobFuture;
}

struct QueuedTask {
    id: TaskId,
    kind: TaskKind,
    state: Arc<watch::Sender<TaskState>>,
    cancel: CancelToken,
}

struct TaskEntry {
    state: watch::Receiver<TaskState>,
    cancel: CancelToken,
}

/// Bounded task queue and worker pool.
///
/// Dropping the scheduler closes the queue; the dispatcher drains what
/// was already accepted and then exits.
pub struct TaskScheduler {
    queue: mpsc::Sender<QueuedTask>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    /// Starts the dispatcher. Must be called within a tokio runtime.
    pub fn new(job: Arc<dyn Job>, worker_count: usize, queue_depth: usize) -> Self {
        let (queue, rx) = mpsc::channel(queue_depth);
        tokio::spawn(dispatch(job, rx, worker_count));

        Self {
            queue,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueues a task, failing fast when the queue is full.
    pub fn submit(&self, kind: TaskKind) -> Result<TaskId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(TaskState::Queued);
        let state = Arc::new(state_tx);
        let cancel = CancelToken::default();

        let queued = QueuedTask {
            id,
            kind,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        match self.queue.try_send(queued) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                debug!(id = task.id, "queue full, rejecting submission");
                return Err(EngineError::Overloaded);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(EngineError::Custom("task scheduler has shut down".to_string()));
            }
        }

        self.tasks.lock()?.insert(
            id,
            TaskEntry {
                state: state_rx,
                cancel,
            },
        );
        debug!(id, "queued task");
        Ok(id)
    }

    pub fn status(&self, id: TaskId) -> Result<TaskState> {
        let tasks = self.tasks.lock()?;
        let entry = tasks.get(&id).ok_or(EngineError::UnknownTask(id))?;
        let state = entry.state.borrow().clone();
        Ok(state)
    }

    /// Requests cancellation. The flag is honored at the task's next
    /// suspension point; an already-terminal task is unaffected.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        let tasks = self.tasks.lock()?;
        let entry = tasks.get(&id).ok_or(EngineError::UnknownTask(id))?;
        entry.cancel.cancel();
        debug!(id, "cancellation requested");
        Ok(())
    }

    /// Waits until the task reaches a terminal state.
    pub async fn wait(&self, id: TaskId) -> Result<TaskState> {
        let mut rx = {
            let tasks = self.tasks.lock()?;
            let entry = tasks.get(&id).ok_or(EngineError::UnknownTask(id))?;
            entry.state.clone()
        };

        loop {
            let state = rx.borrow_and_update().clone();
            if state.is_terminal() {
                return Ok(state);
            }
            if rx.changed().await.is_err() {
                // dispatcher is gone; report whatever state was last seen
                return Ok(rx.borrow().clone());
            }
        }
    }
}

/// The dispatcher loop. A worker permit is claimed before the next task
/// is pulled, so the queue keeps holding tasks while the pool is busy.
async fn dispatch(job: Arc<dyn Job>, mut rx: mpsc::Receiver<QueuedTask>, worker_count: usize) {
    let workers = Arc::new(Semaphore::new(worker_count));
    loop {
        let permit = match Arc::clone(&workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let Some(task) = rx.recv().await else {
            break;
        };

        if task.cancel.is_cancelled() {
            debug!(id = task.id, "task cancelled while queued");
            let _ = task.state.send(TaskState::Cancelled);
            continue;
        }

        let job = Arc::clone(&job);
        tokio::spawn(async move {
            let _permit = permit;
            let id = task.id;
            debug!(id, kind = task.kind.describe(), "task running");
            let _ = task.state.send(TaskState::Running);

            let signals = TaskSignals {
                cancel: task.cancel.clone(),
                state: Arc::clone(&task.state),
            };
            let final_state = match job.run(task.kind, signals).await {
                Ok(JobOutcome::Completed(seq)) => TaskState::Completed(seq),
                Ok(JobOutcome::Cancelled) => TaskState::Cancelled,
                Err(err) => {
                    warn!(id, %err, "task failed");
                    TaskState::Failed {
                        kind: err.kind(),
                        detail: err.to_string(),
                    }
                }
            };
            debug!(id, state = ?final_state, "task finished");
            let _ = task.state.send(final_state);
        });
    }
}

#[cfg(test)]
pub(crate) fn test_signals() -> (TaskSignals, watch::Receiver<TaskState>) {
    let (tx, rx) = watch::channel(TaskState::Running);
    (
        TaskSignals {
            cancel: CancelToken::default(),
            state: Arc::new(tx),
        },
        rx,
    )
}
