//! Batches of records captured for one save attempt
//!
//! A batch is an immutable snapshot of the pending queue, taken when a save
//! begins. The [`BatchCursor`] tracks the boundary between the durably
//! persisted prefix and the unsaved suffix:
//!
//! - records at indices `< next_unsaved` are persisted
//! - records at indices `>= next_unsaved` are not
//! - the cursor only moves forward, one record at a time, and only after the
//!   writer affirmed the durable append of exactly that record
//!
//! A retry therefore resumes exactly where the previous attempt stopped,
//! without re-persisting or skipping any record.

mod pending;

pub use pending::PendingQueue;

/// Forward-only cursor over an ordered batch of records.
#[derive(Debug)]
pub struct BatchCursor<R> {
    /// Records of this batch, in arrival order.
    batch: Vec<R>,
    /// Index of the first record that is not yet persisted.
    next_unsaved: usize,
}

impl<R> BatchCursor<R> {
    /// Wrap a batch. No record is persisted yet.
    pub fn new(batch: Vec<R>) -> Self {
        Self {
            batch,
            next_unsaved: 0,
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Whether the batch holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Number of records already persisted.
    pub fn saved_count(&self) -> usize {
        self.next_unsaved
    }

    /// Number of records not yet persisted.
    pub fn unsaved_count(&self) -> usize {
        self.batch.len() - self.next_unsaved
    }

    /// Whether any record of this batch still needs to be persisted.
    pub fn has_unsaved(&self) -> bool {
        self.next_unsaved < self.batch.len()
    }

    /// The next record to persist, or `None` if the batch is exhausted.
    ///
    /// Does not move the cursor. Call [`advance`](Self::advance) once the
    /// returned record has been durably persisted.
    pub fn peek_next_unsaved(&self) -> Option<&R> {
        self.batch.get(self.next_unsaved)
    }

    /// Marks the record returned by the last `peek_next_unsaved` as persisted.
    ///
    /// Must only be called right after the writer affirmed the durable append
    /// of that record.
    pub fn advance(&mut self) {
        debug_assert!(self.has_unsaved(), "advance past the end of the batch");
        if self.has_unsaved() {
            self.next_unsaved += 1;
        }
    }

    /// View of the records that are not yet persisted.
    pub fn unsaved_suffix(&self) -> &[R] {
        &self.batch[self.next_unsaved..]
    }

    /// Consumes the cursor, returning the unsaved suffix in order.
    ///
    /// The persisted prefix is dropped.
    pub fn into_unsaved(mut self) -> Vec<R> {
        self.batch.split_off(self.next_unsaved)
    }
}
