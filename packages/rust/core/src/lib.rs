//! Task pipeline orchestration for diplomagen.
//!
//! This crate ties the normalizer, the renderer, and the blob store together
//! into background tasks whose progress can be streamed to one consumer:
//! - [`task`]: tasks and the [`TaskRegistry`]
//! - [`progress`]: the per-task [`ProgressBroadcaster`]
//! - [`partition`](mod@partition), [`workers`], [`merge`]: batch fan-out and ordered fan-in
//! - [`pipeline`]: the `normalize` / `render` stage entry points
//! - [`bridge`]: relaying progress to a consumer, with SSE framing
//! - [`sweep`]: retention of finished tasks and stored blobs

pub mod bridge;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod sweep;
pub mod task;
pub mod workers;

pub use bridge::{ProgressSink, RelayEnd, SseEncoder, SseSink, relay};
pub use merge::OrderedMerge;
pub use partition::partition;
pub use pipeline::{NormalizeSummary, Pipeline, RenderSummary};
pub use progress::ProgressBroadcaster;
pub use sweep::{RetentionSweeper, SweepReport};
pub use task::{ProgressSubscription, Task, TaskRegistry};
pub use workers::{Dispatch, WorkerPool};
