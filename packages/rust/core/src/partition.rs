//! Batch Partitioner.

use diplomagen_shared::{Batch, DiplomaGenError, NormalizedRecord, Result};

/// Split `records` into contiguous batches of at most `batch_size`, indexed
/// 0..k-1 in input order. Every batch but the last holds exactly `batch_size`.
pub fn partition(records: Vec<NormalizedRecord>, batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(DiplomaGenError::validation("batch size must be at least 1"));
    }

    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        batches.push(Batch {
            index: batches.len(),
            records: records.by_ref().take(batch_size).collect(),
        });
    }
    Ok(batches)
}
