//! Ordered Merge: reassembles batch outcomes in batch order.
//!
//! Outcomes arrive in completion order and are slotted by index. The merge
//! only produces an artifact when every slot holds a success.

use diplomagen_shared::{BatchOutcome, DiplomaGenError, FragmentResult, Result};

#[derive(Debug)]
pub struct OrderedMerge {
    slots: Vec<Option<FragmentResult>>,
    received: usize,
}

impl OrderedMerge {
    /// A merge expecting outcomes for batches `0..expected`.
    pub fn new(expected: usize) -> Self {
        Self {
            slots: vec![None; expected],
            received: 0,
        }
    }

    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    /// Slot an outcome. Out-of-range and duplicate indices are rejected.
    pub fn insert(&mut self, outcome: BatchOutcome) -> Result<()> {
        let expected = self.slots.len();
        let slot = self.slots.get_mut(outcome.index).ok_or_else(|| {
            DiplomaGenError::validation(format!(
                "batch index {} out of range for {expected} batches",
                outcome.index
            ))
        })?;
        if slot.is_some() {
            return Err(DiplomaGenError::validation(format!(
                "duplicate outcome for batch {}",
                outcome.index
            )));
        }
        *slot = Some(outcome.result);
        self.received += 1;
        Ok(())
    }

    /// Indices with no outcome yet, ascending.
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices whose outcome is a failure, ascending.
    pub fn failed(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Some(FragmentResult::Failure(_))))
            .map(|(i, _)| i)
            .collect()
    }

    /// Concatenate fragments 0..k-1. Gaps fail with `IncompleteMerge`; the
    /// lowest failed index fails with `BatchFailed`.
    pub fn finish(self) -> Result<Vec<u8>> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(DiplomaGenError::IncompleteMerge { missing });
        }

        let total: usize = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(FragmentResult::Success(bytes)) => bytes.len(),
                _ => 0,
            })
            .sum();

        let mut artifact = Vec::with_capacity(total);
        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(FragmentResult::Success(bytes)) => artifact.extend_from_slice(&bytes),
                Some(FragmentResult::Failure(reason)) => {
                    return Err(DiplomaGenError::BatchFailed { index, reason });
                }
                None => return Err(DiplomaGenError::IncompleteMerge { missing: vec![index] }),
            }
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_index_order_whatever_the_arrival_order() {
        let mut merge = OrderedMerge::new(3);
        merge.insert(BatchOutcome::success(2, b"C".to_vec())).unwrap();
        merge.insert(BatchOutcome::success(0, b"A".to_vec())).unwrap();
        assert!(!merge.is_complete());
        merge.insert(BatchOutcome::success(1, b"B".to_vec())).unwrap();
        assert!(merge.is_complete());
        assert_eq!(merge.finish().unwrap(), b"ABC");
    }

    #[test]
    fn failure_surfaces_as_batch_failed() {
        let mut merge = OrderedMerge::new(3);
        merge.insert(BatchOutcome::success(0, b"A".to_vec())).unwrap();
        merge.insert(BatchOutcome::failure(2, "font missing")).unwrap();
        merge.insert(BatchOutcome::failure(1, "bad record")).unwrap();
        assert_eq!(merge.failed(), vec![1, 2]);

        match merge.finish().unwrap_err() {
            DiplomaGenError::BatchFailed { index, reason } => {
                assert_eq!(index, 1);
                assert_eq!(reason, "bad record");
            }
            other => panic!("expected BatchFailed, got {other}"),
        }
    }

    #[test]
    fn gaps_are_reported_not_filled() {
        let mut merge = OrderedMerge::new(4);
        merge.insert(BatchOutcome::success(1, b"B".to_vec())).unwrap();
        assert_eq!(merge.missing(), vec![0, 2, 3]);
        assert!(matches!(
            merge.finish(),
            Err(DiplomaGenError::IncompleteMerge { missing }) if missing == vec![0, 2, 3]
        ));
    }

    #[test]
    fn duplicate_and_out_of_range_indices_are_rejected() {
        let mut merge = OrderedMerge::new(2);
        merge.insert(BatchOutcome::success(0, vec![])).unwrap();
        assert!(merge.insert(BatchOutcome::success(0, vec![])).is_err());
        assert!(merge.insert(BatchOutcome::success(2, vec![])).is_err());
        assert_eq!(merge.received(), 1);
    }

    #[test]
    fn empty_merge_is_empty_artifact() {
        assert!(OrderedMerge::new(0).finish().unwrap().is_empty());
    }
}
