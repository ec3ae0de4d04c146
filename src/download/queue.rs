//! Shared task list for the download workers.
//!
//! All state transitions happen under one mutex and are O(1); the lock is
//! never held across network or disk I/O. Every transition into a terminal
//! state bumps a watch counter so the monitor wakes without polling.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::digest::BlockDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    InProgress,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// One block that is missing from the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub hash: BlockDigest,
    /// Name of the entry the block belongs to.
    pub display_name: String,
    pub state: TaskState,
    /// Number of failed attempts that were followed by a retry.
    pub retry_count: u32,
}

impl DownloadTask {
    pub fn new(hash: BlockDigest, display_name: impl Into<String>) -> Self {
        Self {
            hash,
            display_name: display_name.into(),
            state: TaskState::Waiting,
            retry_count: 0,
        }
    }
}

/// Exclusive right to work on one task, handed out by [`TaskQueue::claim`].
///
/// Not `Clone`: settling a claim consumes it.
#[derive(Debug)]
pub struct Claim {
    index: usize,
    pub hash: BlockDigest,
    pub display_name: String,
    pub retry_count: u32,
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Returned to the queue; holds the updated retry count.
    Retry(u32),
    Failed,
}

pub struct TaskQueue {
    tasks: Mutex<Vec<DownloadTask>>,
    settled: watch::Sender<usize>,
    max_attempts: u32,
}

impl TaskQueue {
    pub fn new(tasks: Vec<DownloadTask>, max_attempts: u32) -> Self {
        let settled = tasks.iter().filter(|t| t.state.is_terminal()).count();
        let (tx, _) = watch::channel(settled);
        Self {
            tasks: Mutex::new(tasks),
            settled: tx,
            max_attempts: max_attempts.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DownloadTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_settled(&self) {
        self.settled.send_modify(|n| *n += 1);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Take the next waiting task, marking it in progress.
    pub fn claim(&self) -> Option<Claim> {
        let mut tasks = self.lock();
        let (index, task) = tasks
            .iter_mut()
            .enumerate()
            .find(|(_, t)| t.state == TaskState::Waiting)?;
        task.state = TaskState::InProgress;
        Some(Claim {
            index,
            hash: task.hash,
            display_name: task.display_name.clone(),
            retry_count: task.retry_count,
        })
    }

    /// Mark a claimed task as downloaded and stored.
    pub fn complete(&self, claim: Claim) {
        {
            let mut tasks = self.lock();
            tasks[claim.index].state = TaskState::Done;
        }
        self.bump_settled();
    }

    /// Whether failing `claim` now would send it back to the queue rather
    /// than mark it failed.
    pub fn will_retry(&self, claim: &Claim) -> bool {
        claim.retry_count + 1 < self.max_attempts
    }

    /// Record a failed attempt: requeue the task or give up on it once the
    /// attempt bound is reached.
    pub fn fail(&self, claim: Claim) -> FailOutcome {
        let outcome = {
            let mut tasks = self.lock();
            let task = &mut tasks[claim.index];
            if !self.will_retry(&claim) {
                task.state = TaskState::Failed;
                FailOutcome::Failed
            } else {
                task.retry_count += 1;
                task.state = TaskState::Waiting;
                FailOutcome::Retry(task.retry_count)
            }
        };
        if outcome == FailOutcome::Failed {
            self.bump_settled();
        }
        outcome
    }

    /// Mark every non-terminal task failed. Used once no worker is left to
    /// settle them, so the monitor cannot wait forever.
    pub fn fail_unsettled(&self) -> usize {
        let abandoned = {
            let mut tasks = self.lock();
            let mut n = 0;
            for task in tasks.iter_mut().filter(|t| !t.state.is_terminal()) {
                task.state = TaskState::Failed;
                n += 1;
            }
            n
        };
        if abandoned > 0 {
            self.settled.send_modify(|n| *n += abandoned);
        }
        abandoned
    }

    /// Receiver of the number of tasks in a terminal state.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.settled.subscribe()
    }

    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.lock().clone()
    }

    pub fn has_failures(&self) -> bool {
        self.lock().iter().any(|t| t.state == TaskState::Failed)
    }
}
