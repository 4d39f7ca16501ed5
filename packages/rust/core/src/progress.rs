//! Progress Broadcaster: the writing half of a task's progress stream.
//!
//! One orchestrator emits through the broadcaster while at most one bridge
//! reads the other end. The channel is bounded, so every send also watches the
//! task's cancellation token and a departed consumer cannot wedge the writer.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use diplomagen_shared::{
    DiplomaGenError, ProgressEvent, Result, TaskEvent, TaskId, TerminalEvent, TerminalState,
};

pub struct ProgressBroadcaster {
    task_id: TaskId,
    tx: mpsc::Sender<TaskEvent>,
    cancel: CancellationToken,
    last: AtomicU8,
    finished: AtomicBool,
}

impl ProgressBroadcaster {
    pub(crate) fn new(task_id: TaskId, tx: mpsc::Sender<TaskEvent>, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            tx,
            cancel,
            last: AtomicU8::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// Highest percentage emitted so far.
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Emit a checkpoint. The percentage is clamped to `last()..=100` so the
    /// stream never goes backwards. Waits for channel space, returning
    /// `Cancelled` if the task is cancelled first. A no-op once finished.
    pub async fn emit(&self, status: impl Into<String>, progress: u8) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        let requested = progress.min(100);
        let previous = self.last.fetch_max(requested, Ordering::SeqCst);
        let progress = requested.max(previous);

        let event = TaskEvent::Progress(ProgressEvent {
            status: status.into(),
            progress,
            error: None,
        });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DiplomaGenError::Cancelled),
            permit = self.tx.reserve() => {
                let permit = permit.map_err(|_| DiplomaGenError::Cancelled)?;
                trace!(task_id = %self.task_id, progress, "progress");
                permit.send(event);
                Ok(())
            }
        }
    }

    /// Send the terminal marker. Only the first call has any effect.
    ///
    /// A succeeded run reports 100; other states keep the last percentage.
    /// After cancellation the marker is offered without waiting, so it is
    /// dropped if the channel is full. Returns whether it was queued.
    pub async fn finish(&self, state: TerminalState, error: Option<String>) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }

        let progress = match state {
            TerminalState::Succeeded => {
                self.last.fetch_max(100, Ordering::SeqCst);
                100
            }
            _ => self.last(),
        };
        let event = TaskEvent::Finished(TerminalEvent {
            state,
            progress,
            error,
        });

        let queued = if self.cancel.is_cancelled() {
            self.tx.try_send(event).is_ok()
        } else {
            tokio::select! {
                biased;
                permit = self.tx.reserve() => match permit {
                    Ok(permit) => {
                        permit.send(event);
                        true
                    }
                    Err(_) => false,
                },
                _ = self.cancel.cancelled() => self.tx.try_send(event).is_ok(),
            }
        };

        if !queued {
            debug!(task_id = %self.task_id, %state, "terminal event not queued");
        }
        queued
    }
}
