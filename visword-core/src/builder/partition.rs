//! Id-space partitioning and the per-worker encoding loop

use std::ops::Range;

use crate::DocId;
use crate::document::{Document, FieldValue};
use crate::encoder::Encoder;
use crate::error::{DocumentFailure, Error, Result};
use crate::features::{CodecFactory, FeatureCodec};
use crate::progress::{CancellationToken, ProgressTracker};
use crate::store::DocumentStore;
use crate::structures::EncodedFields;

/// Split `[0, total)` into `workers` contiguous ranges
///
/// Range lengths differ by at most one; earlier ranges take the remainder.
pub fn partitions(total: DocId, workers: usize) -> Vec<Range<DocId>> {
    let workers = workers.max(1) as u64;
    let total = total as u64;
    let base = total / workers;
    let rem = total % workers;
    let mut ranges = Vec::with_capacity(workers as usize);
    let mut start = 0u64;
    for w in 0..workers {
        let len = base + u64::from(w < rem);
        ranges.push(start as DocId..(start + len) as DocId);
        start += len;
    }
    ranges
}

/// Per-worker tallies
#[derive(Debug, Default)]
pub(crate) struct WorkerOutcome {
    pub(crate) encoded: usize,
    pub(crate) skipped: usize,
    pub(crate) failures: Vec<DocumentFailure>,
}

impl WorkerOutcome {
    pub(crate) fn absorb(&mut self, other: WorkerOutcome) {
        self.encoded += other.encoded;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub(crate) fn record(&mut self, id: DocId, result: Result<()>) {
        match result {
            Ok(()) => self.encoded += 1,
            Err(error) => {
                log::warn!("Failed to encode document {}: {}", id, error);
                self.failures.push(DocumentFailure { doc: id, error });
            }
        }
    }
}

/// Everything an encoding worker reads; shared immutably by all workers
pub(crate) struct EncodePass<'a> {
    pub(crate) store: &'a dyn DocumentStore,
    pub(crate) codec: &'a CodecFactory,
    pub(crate) encoder: Encoder<'a>,
    pub(crate) fields: &'a EncodedFields,
    pub(crate) id_field: &'a str,
    pub(crate) discard_raw: bool,
    pub(crate) tracker: &'a ProgressTracker,
    pub(crate) cancel: &'a CancellationToken,
}

impl EncodePass<'_> {
    /// Encode every live document of `range` in ascending id order
    ///
    /// Per-document errors are collected; only cancellation ends the loop early.
    pub(crate) fn run_range(&self, range: Range<DocId>) -> Result<WorkerOutcome> {
        let codec = (self.codec)();
        let mut outcome = WorkerOutcome::default();
        for id in range {
            self.cancel.check()?;
            match self.store.get_document(id) {
                Ok(Some(doc)) => outcome.record(id, self.encode_document(codec.as_ref(), id, doc)),
                Ok(None) => outcome.skipped += 1,
                Err(e) => outcome.record(id, Err(e)),
            }
            self.tracker.advance(1);
        }
        Ok(outcome)
    }

    /// Encode `doc` (stored at `id`) and write it back by identifier
    pub(crate) fn encode_document(
        &self,
        codec: &dyn FeatureCodec,
        id: DocId,
        mut doc: Document,
    ) -> Result<()> {
        let key = doc
            .get_first(self.id_field)
            .and_then(FieldValue::as_text)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::DocumentNotFound(format!(
                    "document {} has no '{}' value",
                    id, self.id_field
                ))
            })?;

        let values: Vec<Vec<u8>> = doc
            .get_all(codec.field_name())
            .map(FieldValue::to_bytes)
            .collect();
        let features = codec.decode_all(&values)?;
        let descriptor = self.encoder.encode(&features)?;

        let raw = self.discard_raw.then(|| codec.field_name());
        self.encoder.stage(&mut doc, &descriptor, self.fields, raw);
        self.store.update_document((self.id_field, key.as_str()), doc)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_coverage() {
        let ranges = partitions(100, 8);
        assert_eq!(ranges.len(), 8);
        let mut next = 0;
        for r in &ranges {
            assert_eq!(r.start, next);
            assert!(r.len() == 12 || r.len() == 13);
            next = r.end;
        }
        assert_eq!(next, 100);
    }

    #[test]
    fn test_more_workers_than_docs() {
        let ranges = partitions(3, 8);
        assert_eq!(ranges.len(), 8);
        let covered: Vec<DocId> = ranges.into_iter().flatten().collect();
        assert_eq!(covered, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_id_space() {
        assert!(partitions(0, 4).iter().all(|r| r.is_empty()));
        assert_eq!(partitions(5, 0), vec![0..5]);
    }
}
