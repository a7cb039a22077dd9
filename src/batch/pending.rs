//! In-memory buffer of records that are not yet persisted

use std::collections::VecDeque;

/// FIFO buffer of pending records.
///
/// Append-only from the producer side. The scheduler drains it into a batch
/// when a save begins, and puts the unsaved suffix of a failed batch back at
/// the front, so that later arrivals stay behind it.
#[derive(Debug)]
pub struct PendingQueue<R> {
    records: VecDeque<R>,
}

impl<R> Default for PendingQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> PendingQueue<R> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    /// Append a record at the back.
    pub fn push(&mut self, record: R) {
        self.records.push_back(record);
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there is nothing pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Moves every pending record into a new batch, leaving the queue empty.
    pub fn take_batch(&mut self) -> Vec<R> {
        Vec::from(std::mem::take(&mut self.records))
    }

    /// Puts records back at the front, ahead of anything that arrived since.
    ///
    /// The relative order of `records` is preserved.
    pub fn prepend(&mut self, records: Vec<R>) {
        if records.is_empty() {
            return;
        }
        if self.records.is_empty() {
            self.records = VecDeque::from(records);
            return;
        }
        let mut merged = VecDeque::with_capacity(records.len() + self.records.len());
        merged.extend(records);
        merged.append(&mut self.records);
        self.records = merged;
    }

    /// Drops every pending record, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }

    /// Iterates over the pending records in order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }
}
