//! State owned by the scheduling context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::batch::PendingQueue;
use crate::config::TradeLogSettings;
use crate::notify::FailureNotifier;
use crate::record::LogRecord;
use crate::retry::{Interrupt, RetryPolicy};
use crate::writer::RecordWriter;

pub(super) struct EngineState<R: LogRecord> {
    /// Shared with the handle so that appends to a disabled engine are
    /// dropped without a round trip.
    pub(super) enabled: Arc<AtomicBool>,
    pub(super) setup_completed: bool,
    pub(super) pending: PendingQueue<R>,
    /// `None` while a task has it on a worker.
    pub(super) writer: Option<Box<dyn RecordWriter<R>>>,
    pub(super) storage_type: String,
    /// Deadline of the armed delayed save.
    pub(super) delayed_save: Option<Instant>,
    pub(super) debounce: Duration,
    pub(super) settings: Arc<TradeLogSettings>,
    pub(super) retry: RetryPolicy,
    pub(super) interrupt: Interrupt,
    pub(super) notifier: FailureNotifier,
}

impl<R: LogRecord> EngineState<R> {
    pub(super) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Stops all future scheduling and drops the buffered records.
    ///
    /// A save that is already executing runs to completion.
    pub(super) fn disable(&mut self, reason: &str) {
        let was_enabled = self.enabled.swap(false, Ordering::AcqRel);
        self.cancel_delayed_save();
        let dropped = self.pending.clear();

        if was_enabled {
            tracing::error!(
                storage = %self.storage_type,
                reason,
                dropped,
                "Trade log disabled, records won't be logged"
            );
        } else if dropped > 0 {
            tracing::warn!(storage = %self.storage_type, dropped, "Dropped records of disabled trade log");
        }
    }

    /// Arms the delayed save, unless one is armed already or there is
    /// nothing a save could do yet.
    pub(super) fn schedule_delayed_save(&mut self) {
        if !self.setup_completed || !self.is_enabled() || self.pending.is_empty() {
            return;
        }
        if self.delayed_save.is_some() {
            return;
        }
        self.delayed_save = Some(Instant::now() + self.debounce);
    }

    pub(super) fn cancel_delayed_save(&mut self) {
        self.delayed_save = None;
    }
}
