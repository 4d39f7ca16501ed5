//! Renderer contract and the bundled page-template renderer.
//!
//! A [`Renderer`] turns one [`Batch`] into one fragment of bytes. The pipeline
//! only concatenates fragments in batch order, so a renderer must produce
//! output that is valid when appended to the previous batch's output.

mod layout;
mod template;

use diplomagen_shared::{Batch, Result};

pub use layout::{center, wrap};
pub use template::{BUILTIN_TEMPLATE, PAGE_BREAK, TemplateRenderer};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Trait for batch renderers.
///
/// Implementations are shared across worker threads and must not keep
/// per-batch mutable state. `render` is called from a blocking thread.
pub trait Renderer: Send + Sync {
    /// Human-readable renderer name for tracing.
    fn name(&self) -> &str;

    /// Render every record in `batch`, in record order.
    fn render(&self, batch: &Batch) -> Result<Vec<u8>>;
}
