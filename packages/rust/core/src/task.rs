//! Tasks and the task registry.
//!
//! A [`Task`] is one pipeline run: its id, its progress stream, its
//! cancellation token, and a single-fire completion signal. The
//! [`TaskRegistry`] maps ids to tasks and is passed to whoever serves them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use diplomagen_shared::{DiplomaGenError, Result, TaskEvent, TaskId, TerminalState};

use crate::progress::ProgressBroadcaster;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

pub struct Task {
    id: TaskId,
    progress: ProgressBroadcaster,
    /// Reading half of the progress stream, parked here while no bridge holds it.
    reader: Mutex<Option<mpsc::Receiver<TaskEvent>>>,
    cancel: CancellationToken,
    completion: watch::Sender<Option<TerminalState>>,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<Option<String>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("outcome", &self.outcome())
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at())
            .finish()
    }
}

impl Task {
    /// Create a task whose progress channel holds `progress_capacity` events.
    pub fn new(id: TaskId, progress_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(progress_capacity.max(1));
        let cancel = CancellationToken::new();
        let (completion, _) = watch::channel(None);
        Self {
            progress: ProgressBroadcaster::new(id.clone(), tx, cancel.clone()),
            id,
            reader: Mutex::new(Some(rx)),
            cancel,
            completion,
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    /// Error message the run ended with, if it did not succeed.
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// The writing half of the progress stream.
    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    /// The token every blocking pipeline step observes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the run to stop. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(task_id = %self.id, "cancelling task");
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminal state if the run has finished.
    pub fn outcome(&self) -> Option<TerminalState> {
        *self.completion.borrow()
    }

    /// Wait for the run to finish.
    pub async fn wait(&self) -> TerminalState {
        let mut rx = self.completion.subscribe();
        let state = rx.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        state.unwrap_or(TerminalState::Cancelled)
    }

    /// Attach the single progress reader.
    pub fn subscribe(self: &Arc<Self>) -> Result<ProgressSubscription> {
        let rx = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| DiplomaGenError::AlreadyAttached(self.id.to_string()))?;
        Ok(ProgressSubscription {
            task: Arc::clone(self),
            rx: Some(rx),
            done: false,
        })
    }

    /// End the run: send the terminal event, stamp `finished_at` and fire
    /// completion. Only the first call has any effect.
    pub async fn finish(&self, state: TerminalState, error: Option<String>) -> bool {
        if self.outcome().is_some() {
            return false;
        }
        *self.error.lock() = error.clone();
        self.progress.finish(state, error).await;
        *self.finished_at.lock() = Some(Utc::now());
        self.completion.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(state);
            true
        })
    }
}

/// Exclusive read access to a task's progress stream.
///
/// Dropping the subscription hands the reader back to the task so a later
/// bridge can attach.
pub struct ProgressSubscription {
    task: Arc<Task>,
    rx: Option<mpsc::Receiver<TaskEvent>>,
    done: bool,
}

impl ProgressSubscription {
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Next event, or `None` after the terminal event or once the task has
    /// finished and the stream is drained.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        if self.done {
            return None;
        }
        let rx = self.rx.as_mut()?;
        let mut completion = self.task.completion.subscribe();

        let received = tokio::select! {
            biased;
            event = rx.recv() => Some(event),
            _ = completion.wait_for(Option::is_some) => None,
        };
        let event = match received {
            Some(event) => event,
            None => rx.try_recv().ok(),
        };

        match &event {
            Some(e) if e.is_terminal() => self.done = true,
            None => self.done = true,
            _ => {}
        }
        event
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            *self.task.reader.lock() = Some(rx);
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrency-safe id → task map. Readers share the lock; the lock is never
/// held across an await.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<Task>>>,
    progress_capacity: usize,
}

impl TaskRegistry {
    pub fn new(progress_capacity: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            progress_capacity,
        }
    }

    /// Install a fresh task under `id`, replacing any existing entry.
    pub fn create(&self, id: TaskId) -> Arc<Task> {
        let task = Arc::new(Task::new(id.clone(), self.progress_capacity));
        if let Some(previous) = self.tasks.write().insert(id, Arc::clone(&task)) {
            warn!(task_id = %previous.id(), "replaced existing task");
        }
        task
    }

    pub fn get(&self, id: &TaskId) -> Result<Arc<Task>> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DiplomaGenError::TaskNotFound(id.to_string()))
    }

    /// Remove and return the task. The run itself is left alone.
    pub fn delete(&self, id: &TaskId) -> Option<Arc<Task>> {
        self.tasks.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop every task that finished before `cutoff`. Unfinished tasks stay.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<TaskId> {
        let mut tasks = self.tasks.write();
        let stale: Vec<TaskId> = tasks
            .iter()
            .filter(|(_, task)| task.finished_at().is_some_and(|at| at < cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            tasks.remove(id);
        }
        if !stale.is_empty() {
            info!(evicted = stale.len(), "evicted finished tasks");
        }
        stale
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(diplomagen_shared::PipelineConfig::default().progress_capacity)
    }
}
