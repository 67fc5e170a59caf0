//! Deadline-bounded, cancellable background work.
//!
//! [`TaskSpawner::spawn`] runs `work` on the runtime's worker threads and delivers exactly one
//! terminal outcome (value, error, timeout or cancellation) as a closure on the update
//! queue. Delivery is never synchronous and never repeated. Work runs in its own tokio
//! task, so a panic inside a driver still ends in a delivered error.
//!
//! Cancellation is best effort. The work future is dropped as soon as the token fires, but
//! a driver that hands the call to a blocking thread keeps that thread busy until the call
//! returns on its own; only the result is discarded.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::dispatcher::UpdateSender;
use crate::error::TaskError;

pub const TASK_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct CancelToken {
    id: TaskId,
    token: CancellationToken,
}

impl CancelToken {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) -> bool {
        if self.token.is_cancelled() {
            tracing::debug!(task = %self.id, "task already cancelled");
            return false;
        }
        self.token.cancel();
        tracing::debug!(task = %self.id, "task cancelled");
        true
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    token: CancellationToken,
}

impl TaskContext {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

pub struct TaskSpawner<S> {
    runtime: Handle,
    updates: UpdateSender<S>,
    deadline: Duration,
    spawned: Arc<AtomicU64>,
}

impl<S> Clone for TaskSpawner<S> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            updates: self.updates.clone(),
            deadline: self.deadline,
            spawned: Arc::clone(&self.spawned),
        }
    }
}

impl<S> fmt::Debug for TaskSpawner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpawner")
            .field("deadline", &self.deadline)
            .field("spawned", &self.spawned.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: 'static> TaskSpawner<S> {
    #[must_use]
    pub fn new(runtime: Handle, updates: UpdateSender<S>) -> Self {
        Self {
            runtime,
            updates,
            deadline: TASK_DEADLINE,
            spawned: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn updates(&self) -> &UpdateSender<S> {
        &self.updates
    }

    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn spawn<T, W, Fut, D>(&self, operation: &'static str, work: W, deliver: D) -> CancelToken
    where
        T: Send + 'static,
        W: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        D: FnOnce(&mut S, TaskId, Result<T, TaskError>) + Send + 'static,
    {
        let id = TaskId(self.spawned.fetch_add(1, Ordering::Relaxed) + 1);
        let token = CancellationToken::new();
        let limit = self.deadline;
        let deadline = Instant::now() + limit;
        let context = TaskContext {
            id,
            token: token.clone(),
        };
        let watch = token.clone();
        let updates = self.updates.clone();

        let span = tracing::debug_span!("task", %id, operation);
        self.runtime.spawn(
            async move {
                tracing::debug!("task started");
                let mut worker =
                    tokio::spawn(async move { work(context).await }.in_current_span());
                let outcome = tokio::select! {
                    biased;
                    () = watch.cancelled() => Err(TaskError::Cancelled),
                    () = tokio::time::sleep_until(deadline) => Err(TaskError::Timeout(limit)),
                    joined = &mut worker => {
                        joined.unwrap_or_else(|error| Err(worker_failure(&error)))
                    }
                };
                worker.abort();
                match &outcome {
                    Ok(_) => tracing::debug!("task finished"),
                    Err(error) => tracing::debug!(%error, "task ended without a value"),
                }
                if updates
                    .enqueue(move |state: &mut S| deliver(state, id, outcome))
                    .is_err()
                {
                    tracing::debug!("update queue closed, outcome dropped");
                }
            }
            .instrument(span),
        );

        CancelToken { id, token }
    }
}

fn worker_failure(error: &JoinError) -> TaskError {
    if error.is_cancelled() {
        return TaskError::Cancelled;
    }
    tracing::warn!(%error, "task panicked");
    TaskError::Query("background task panicked".to_string())
}

/// Tracks the at-most-one in-flight task of a slot.
///
/// Outcomes are matched by [`TaskId`], which is unique per spawner, so a result that
/// arrives after the slot abandoned or replaced its task is recognised as stale.
#[derive(Debug, Default)]
pub struct TaskSlot {
    pending: Option<CancelToken>,
}

impl TaskSlot {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn pending_id(&self) -> Option<TaskId> {
        self.pending.as_ref().map(CancelToken::id)
    }

    pub fn attach(&mut self, token: CancelToken) {
        if let Some(previous) = self.pending.replace(token) {
            tracing::warn!(task = %previous.id(), "replacing an unsettled task");
            previous.cancel();
        }
    }

    pub fn settle(&mut self, id: TaskId) -> Result<(), TaskError> {
        match &self.pending {
            Some(token) if token.id() == id => {
                self.pending = None;
                Ok(())
            }
            _ => Err(TaskError::Stale),
        }
    }

    pub fn cancel(&self) -> bool {
        if let Some(token) = &self.pending {
            token.cancel()
        } else {
            tracing::info!("nothing to cancel");
            false
        }
    }

    pub fn abandon(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}
