//! Batched bulk writer.
//!
//! Splits a list of conditional stock updates into consecutive batches of at
//! most `batch_size` and submits each as one storage request, optionally
//! inside a caller-supplied transaction. Batches run in order; the first
//! failing batch stops the run and is reported by its 1-indexed number.
//! Updates in earlier batches stay applied unless the caller's transaction
//! is rolled back.

use stock_store::{BatchOutcome, StockStore, StockTransaction, StockUpdate};

use crate::error::BulkWriteError;

/// Default maximum number of updates per storage request.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Counters summed over every batch of one bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub matched: u64,
    pub modified: u64,
    pub inserted: u64,
    pub upserted: u64,
    pub deleted: u64,
    pub batch_count: usize,
    /// Whether each update, in submission order, matched its record.
    pub op_matched: Vec<bool>,
}

impl BulkWriteSummary {
    fn absorb(&mut self, outcome: BatchOutcome) {
        self.matched += outcome.matched;
        self.modified += outcome.modified;
        self.inserted += outcome.inserted;
        self.upserted += outcome.upserted;
        self.deleted += outcome.deleted;
        self.batch_count += 1;
        self.op_matched.extend(outcome.op_matched);
    }

    /// Index of the first update that did not match, if any.
    pub fn first_unmatched(&self) -> Option<usize> {
        self.op_matched.iter().position(|matched| !matched)
    }

    pub fn all_matched(&self) -> bool {
        self.first_unmatched().is_none()
    }
}

/// Submits conditional updates in bounded batches.
#[derive(Debug, Clone, Copy)]
pub struct BulkWriter {
    batch_size: usize,
}

impl Default for BulkWriter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BulkWriter {
    /// Creates a writer. A zero batch size is treated as 1.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Submits `updates` batch by batch.
    ///
    /// With a transaction, every batch goes through it and nothing is
    /// visible until the caller commits. Without one, each batch is applied
    /// as soon as it is submitted.
    #[tracing::instrument(skip_all, fields(ops = updates.len(), batch_size = self.batch_size))]
    pub async fn execute<S: StockStore>(
        &self,
        store: &S,
        updates: &[StockUpdate],
        mut tx: Option<&mut S::Transaction>,
    ) -> Result<BulkWriteSummary, BulkWriteError> {
        let mut summary = BulkWriteSummary::default();

        for (index, batch) in updates.chunks(self.batch_size).enumerate() {
            let batch_number = index + 1;
            let result = match tx.as_deref_mut() {
                Some(tx) => tx.apply_batch(batch).await,
                None => store.apply_batch(batch).await,
            };

            let outcome = result.map_err(|source| {
                tracing::error!(batch = batch_number, error = %source, "bulk write batch failed");
                BulkWriteError {
                    batch: batch_number,
                    source,
                }
            })?;

            metrics::counter!("bulk_write_batches_total").increment(1);
            summary.absorb(outcome);
        }

        tracing::debug!(
            batches = summary.batch_count,
            matched = summary.matched,
            "bulk write finished"
        );
        Ok(summary)
    }
}
