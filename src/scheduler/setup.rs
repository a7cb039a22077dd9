//! One-time writer setup

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use super::state::EngineState;
use super::panic_message;
use crate::record::LogRecord;
use crate::task::{ExecutionTiming, SingletonTask};
use crate::writer::{PersistError, PersistResult, RecordWriter};

pub(super) struct SetupTask<R> {
    _records: PhantomData<fn(R)>,
}

impl<R> SetupTask<R> {
    pub(super) fn new() -> Self {
        Self { _records: PhantomData }
    }
}

pub(super) struct SetupOutcome<R> {
    writer: Option<Box<dyn RecordWriter<R>>>,
    result: PersistResult<()>,
}

impl<R: LogRecord> SingletonTask for SetupTask<R> {
    type State = EngineState<R>;
    type Job = Option<Box<dyn RecordWriter<R>>>;
    type Outcome = SetupOutcome<R>;

    fn name(&self) -> &'static str {
        "trade-log-setup"
    }

    fn prepare(&mut self, state: &mut EngineState<R>) -> Self::Job {
        state.writer.take()
    }

    fn execute(job: Self::Job) -> SetupOutcome<R> {
        let Some(mut writer) = job else {
            return SetupOutcome {
                writer: None,
                result: Err(PersistError::worker_panicked("No writer available for setup")),
            };
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| writer.setup())).unwrap_or_else(|payload| {
            Err(PersistError::worker_panicked(format!(
                "Writer panicked during setup: {}",
                panic_message(payload.as_ref())
            )))
        });
        SetupOutcome {
            writer: Some(writer),
            result,
        }
    }

    fn callback(&mut self, state: &mut EngineState<R>, outcome: SetupOutcome<R>, timing: &ExecutionTiming) {
        state.writer = outcome.writer;

        match outcome.result {
            Ok(()) if state.writer.is_some() => {
                tracing::debug!(storage = %state.storage_type, timing = %timing, "Trade log setup completed");
            }
            Ok(()) => state.disable("writer was lost during setup"),
            Err(e) => {
                tracing::error!(storage = %state.storage_type, error = %e.report(), "Trade log setup failed");
                state.disable(&format!("setup failed: {}", e.summary()));
            }
        }
        // Pending records become eligible for saving from here on.
        state.setup_completed = true;
    }

    fn aborted(&mut self, state: &mut EngineState<R>, reason: &str) {
        state.setup_completed = true;
        state.disable(&format!("setup aborted: {}", reason));
    }
}
