//! Saving a batch of pending records

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use super::panic_message;
use super::state::EngineState;
use crate::batch::BatchCursor;
use crate::record::{LogRecord, SaveOptions};
use crate::retry::{FailedAttempt, Interrupt, RetryPolicy};
use crate::task::{ExecutionTiming, SingletonTask};
use crate::writer::{PersistError, PersistResult, RecordWriter};

pub(super) struct SaveTask<R> {
    _records: PhantomData<fn(R)>,
}

impl<R> SaveTask<R> {
    pub(super) fn new() -> Self {
        Self { _records: PhantomData }
    }
}

/// Everything one save needs, owned by the worker while it runs.
pub(super) struct SaveJob<R> {
    writer: Box<dyn RecordWriter<R>>,
    cursor: BatchCursor<R>,
    options: SaveOptions,
    retry: RetryPolicy,
    interrupt: Interrupt,
}

pub(super) struct SaveOutcome<R> {
    writer: Box<dyn RecordWriter<R>>,
    cursor: BatchCursor<R>,
}

impl<R: LogRecord> SingletonTask for SaveTask<R> {
    type State = EngineState<R>;
    /// `None` if there was nothing to save.
    type Job = Option<SaveJob<R>>;
    type Outcome = Option<SaveOutcome<R>>;

    fn name(&self) -> &'static str {
        "trade-log-save"
    }

    fn prepare(&mut self, state: &mut EngineState<R>) -> Self::Job {
        // This save covers everything pending, including what the delayed
        // save would have picked up.
        state.cancel_delayed_save();

        if !state.is_enabled() || state.pending.is_empty() {
            return None;
        }
        let writer = state.writer.take()?;

        Some(SaveJob {
            writer,
            cursor: BatchCursor::new(state.pending.take_batch()),
            options: state.settings.snapshot(),
            retry: state.retry,
            interrupt: state.interrupt.clone(),
        })
    }

    fn execute(job: Self::Job) -> Self::Outcome {
        let SaveJob {
            mut writer,
            mut cursor,
            options,
            retry,
            interrupt,
        } = job?;
        let storage_type = writer.storage_type().to_string();

        let result = retry.run(
            &interrupt,
            || write_guarded(writer.as_mut(), &mut cursor, &options),
            |failed| log_failed_attempt(&storage_type, failed),
        );

        if let Err(e) = result {
            tracing::error!(
                storage = %storage_type,
                attempts = retry.max_attempts(),
                unsaved = cursor.unsaved_count(),
                error = %e.summary(),
                "Failed to log records! Data might have been lost"
            );
        }

        Some(SaveOutcome { writer, cursor })
    }

    fn callback(&mut self, state: &mut EngineState<R>, outcome: Self::Outcome, timing: &ExecutionTiming) {
        let Some(SaveOutcome { writer, cursor }) = outcome else {
            return;
        };
        state.writer = Some(writer);

        let total = cursor.len();
        let failed = cursor.unsaved_count();
        let verdict = if failed == 0 {
            ""
        } else if failed == total {
            " -- Logging failed!"
        } else {
            " -- Logging partially failed!"
        };
        tracing::debug!(
            "Logged {} records to the {} trade log ({} failed to log): {}{}",
            total,
            state.storage_type,
            failed,
            timing,
            verdict
        );

        if !cursor.has_unsaved() {
            return;
        }

        if !state.is_enabled() {
            tracing::warn!(
                storage = %state.storage_type,
                dropped = failed,
                "Trade log is disabled, dropping unsaved records"
            );
            return;
        }

        // Ahead of everything that arrived during this save
        state.pending.prepend(cursor.into_unsaved());
        state.schedule_delayed_save();
        state.notifier.on_save_failed(&state.storage_type, std::time::Instant::now());
    }

    fn aborted(&mut self, state: &mut EngineState<R>, reason: &str) {
        // The writer and the batch went down with the worker.
        state.disable(&format!("save aborted: {}", reason));
    }
}

/// One attempt. A panicking writer counts as a failed attempt; the cursor
/// keeps whatever progress was made before the panic.
fn write_guarded<R: 'static>(
    writer: &mut dyn RecordWriter<R>,
    cursor: &mut BatchCursor<R>,
    options: &SaveOptions,
) -> PersistResult<()> {
    panic::catch_unwind(AssertUnwindSafe(|| writer.write_batch(cursor, options))).unwrap_or_else(|payload| {
        Err(PersistError::worker_panicked(format!(
            "Writer panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn log_failed_attempt(storage_type: &str, failed: &FailedAttempt<'_, PersistError>) {
    if failed.is_verbose() {
        tracing::error!(
            storage = storage_type,
            attempt = failed.attempt,
            will_retry = failed.will_retry,
            error = %failed.error.report(),
            "Failed to log records (attempt {})",
            failed.attempt
        );
    } else {
        tracing::error!(
            storage = storage_type,
            attempt = failed.attempt,
            "Failed to log records (attempt {}): {}",
            failed.attempt,
            failed.error.summary()
        );
    }
}
