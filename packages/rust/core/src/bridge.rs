//! Progress Bridge: relays one task's progress stream to an outside consumer.
//!
//! The relay holds the task's single subscription. When the consumer goes
//! away it cancels the task, so the orchestrator's pending sends give up
//! instead of waiting for a reader that will never come back.

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use diplomagen_shared::{
    DiplomaGenError, Result, TaskEvent, TerminalEvent, TerminalState,
};

use crate::task::Task;

/// Where relayed events go. An error means the consumer is gone.
pub trait ProgressSink: Send {
    fn send(&mut self, event: &TaskEvent) -> Result<()>;
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The terminal event was delivered.
    Finished(TerminalState),
    /// The consumer left first; the task was cancelled.
    Disconnected,
}

/// Drain `task`'s progress into `sink` until the terminal event.
///
/// Fails with `AlreadyAttached` if another relay holds the stream. If the
/// stream ends without a terminal event (it was dropped on a full channel
/// after cancellation), one is synthesized from the task's outcome.
pub async fn relay(
    task: &Arc<Task>,
    sink: &mut dyn ProgressSink,
    disconnected: &CancellationToken,
) -> Result<RelayEnd> {
    let mut subscription = task.subscribe()?;
    let mut relayed = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = disconnected.cancelled() => {
                info!(task_id = %task.id(), relayed, "consumer disconnected");
                task.cancel();
                return Ok(RelayEnd::Disconnected);
            }
            event = subscription.recv() => event,
        };

        let event = match next {
            Some(event) => event,
            None => TaskEvent::Finished(TerminalEvent {
                state: task.outcome().unwrap_or(TerminalState::Cancelled),
                progress: task.progress().last(),
                error: task.error(),
            }),
        };

        if let Err(e) = sink.send(&event) {
            info!(task_id = %task.id(), relayed, error = %e, "progress sink closed");
            task.cancel();
            return Ok(RelayEnd::Disconnected);
        }
        relayed += 1;

        if let TaskEvent::Finished(terminal) = &event {
            debug!(task_id = %task.id(), relayed, state = %terminal.state, "relay finished");
            return Ok(RelayEnd::Finished(terminal.state));
        }
    }
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Formats task events as server-sent-event frames.
pub struct SseEncoder;

impl SseEncoder {
    /// Sent once before any event; disables client auto-reconnect.
    pub const PREAMBLE: &'static str = "retry: 0\n\n";

    /// Progress becomes a `data:` frame; the terminal event becomes a `done`
    /// event carrying the terminal state.
    pub fn encode(event: &TaskEvent) -> Result<String> {
        let frame = match event {
            TaskEvent::Progress(progress) => format!("data: {}\n\n", to_json(progress)?),
            TaskEvent::Finished(terminal) => {
                format!("event: done\ndata: {}\n\n", to_json(terminal)?)
            }
        };
        Ok(frame)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DiplomaGenError::Encoding(e.to_string()))
}

/// Writes SSE frames to any byte stream, flushing after each frame.
pub struct SseSink<W: Write + Send> {
    out: W,
    started: bool,
}

impl<W: Write + Send> SseSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, started: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_frame(&mut self, frame: &str) -> Result<()> {
        self.out
            .write_all(frame.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|e| DiplomaGenError::io("<sse stream>", e))
    }
}

impl<W: Write + Send> ProgressSink for SseSink<W> {
    fn send(&mut self, event: &TaskEvent) -> Result<()> {
        if !self.started {
            self.write_frame(SseEncoder::PREAMBLE)?;
            self.started = true;
        }
        let frame = SseEncoder::encode(event)?;
        self.write_frame(&frame)
    }
}
