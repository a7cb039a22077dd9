//! Buffered single-writer persistence engine
//!
//! The engine is split into a handle ([`SingleWriterLogger`]) and a
//! scheduler loop running as one tokio task. The loop is the scheduling
//! context: it owns the pending queue, the writer session state, the delayed
//! save deadline and both singleton tasks. The handle only ever sends
//! commands to it.
//!
//! Writer calls never run on the loop. Setup and save executions are moved
//! to the runtime's blocking pool together with the writer, and the writer
//! comes back with the outcome.
//!
//! # Lifecycle
//!
//! ```text
//! start ──► setup() ──► setup task ──► setup completed ──► saves
//!                           │
//!                           └─ failure ──► disabled (records dropped)
//! ```
//!
//! Saves are triggered by the delayed save (armed by the first record after
//! an idle period) or by `flush()`. A failed save puts its unsaved suffix
//! back at the front of the queue and arms the delayed save again.

mod save;
mod setup;
mod state;

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::batch::PendingQueue;
use crate::config::{ConfigError, EngineConfig, TradeLogSettings};
use crate::notify::{FailureNotifier, SessionRegistry};
use crate::record::LogRecord;
use crate::retry::Interrupt;
use crate::task::TaskSlot;
use crate::writer::{PersistError, RecordWriter, WriterRegistry};

use save::SaveTask;
use setup::SetupTask;
use state::EngineState;

/// Errors raised while starting an engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown storage type: {0}")]
    UnknownStorage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not create writer: {0}")]
    Writer(#[from] PersistError),
}

/// Snapshot of the engine's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub setup_completed: bool,
    /// Records buffered and not part of an executing save
    pub pending: usize,
    pub save_in_flight: bool,
    pub delayed_save_armed: bool,
    /// Saves started since the engine was created
    pub save_executions: u64,
}

enum Command<R> {
    Setup,
    Append(R),
    AwaitSetup(oneshot::Sender<()>),
    SaveNow(oneshot::Sender<()>),
    Disable(String),
    Status(oneshot::Sender<EngineStatus>),
    Stop(oneshot::Sender<usize>),
}

/// Configures and starts a [`SingleWriterLogger`].
pub struct LoggerBuilder<R> {
    config: EngineConfig,
    settings: Arc<TradeLogSettings>,
    sessions: Arc<SessionRegistry>,
    _records: PhantomData<fn(R)>,
}

impl<R: LogRecord> LoggerBuilder<R> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            settings: Arc::new(TradeLogSettings::default()),
            sessions: Arc::new(SessionRegistry::new()),
            _records: PhantomData,
        }
    }

    /// Live settings, snapshotted at the start of every save.
    pub fn settings(mut self, settings: Arc<TradeLogSettings>) -> Self {
        self.settings = settings;
        self
    }

    /// Sessions that receive failure notices.
    pub fn sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Resolves the configured storage type in `registry` and starts the
    /// engine on `runtime`.
    pub fn start(self, registry: &WriterRegistry<R>, runtime: &Handle) -> Result<SingleWriterLogger<R>, EngineError> {
        self.config.validate()?;
        let writer = registry
            .create(&self.config.storage, &self.config)
            .ok_or_else(|| EngineError::UnknownStorage(self.config.storage.clone()))??;
        Ok(self.start_with_writer(writer, runtime))
    }

    /// Starts the engine on `runtime` with the given writer.
    ///
    /// The writer's setup does not run until [`SingleWriterLogger::setup`].
    pub fn start_with_writer(self, writer: Box<dyn RecordWriter<R>>, runtime: &Handle) -> SingleWriterLogger<R> {
        let enabled = Arc::new(AtomicBool::new(true));
        let interrupt = Interrupt::new();
        let storage_type = writer.storage_type().to_string();
        let (commands, receiver) = mpsc::unbounded_channel();

        let state = EngineState {
            enabled: Arc::clone(&enabled),
            setup_completed: false,
            pending: PendingQueue::new(),
            writer: Some(writer),
            storage_type: storage_type.clone(),
            delayed_save: None,
            debounce: self.config.debounce(),
            settings: self.settings,
            retry: self.config.retry_policy(),
            interrupt: interrupt.clone(),
            notifier: FailureNotifier::new(self.config.failure_notice_throttle(), self.sessions),
        };
        let scheduler = Scheduler {
            state,
            setup: TaskSlot::new(SetupTask::new(), runtime.clone()),
            save: TaskSlot::new(SaveTask::new(), runtime.clone()),
            commands: receiver,
        };
        runtime.spawn(scheduler.run());

        tracing::debug!(storage = %storage_type, "Trade log engine started");
        SingleWriterLogger {
            commands,
            enabled,
            interrupt,
            storage_type,
        }
    }
}

/// Handle to a running engine.
///
/// `append` is callable from any thread and never blocks. Dropping the handle
/// stops the engine and discards whatever is still buffered; call
/// [`shutdown`](Self::shutdown) to flush first.
pub struct SingleWriterLogger<R> {
    commands: mpsc::UnboundedSender<Command<R>>,
    enabled: Arc<AtomicBool>,
    interrupt: Interrupt,
    storage_type: String,
}

impl<R> std::fmt::Debug for SingleWriterLogger<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleWriterLogger")
            .field("storage_type", &self.storage_type)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl<R> SingleWriterLogger<R> {
    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    /// Whether records are still accepted.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl<R: LogRecord> SingleWriterLogger<R> {
    /// Starts the one-time writer setup. No-op while it runs or once it has
    /// completed.
    pub fn setup(&self) {
        self.send(Command::Setup);
    }

    /// Buffers a record. Dropped if the engine is disabled.
    pub fn append(&self, record: R) {
        if !self.is_enabled() {
            tracing::trace!(storage = %self.storage_type, "Trade log disabled, record dropped");
            return;
        }
        self.send(Command::Append(record));
    }

    /// Saves everything pending and blocks until the setup and every save,
    /// including the one started here, have completed.
    ///
    /// Records appended before the setup was started stay buffered.
    ///
    /// # Panics
    ///
    /// When called from within an async context; use
    /// [`flush_async`](Self::flush_async) there.
    pub fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::AwaitSetup(tx)) {
            let _ = rx.blocking_recv();
        }
        let (tx, rx) = oneshot::channel();
        if self.send(Command::SaveNow(tx)) {
            let _ = rx.blocking_recv();
        }
    }

    /// Async version of [`flush`](Self::flush).
    pub async fn flush_async(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::AwaitSetup(tx)) {
            let _ = rx.await;
        }
        let (tx, rx) = oneshot::channel();
        if self.send(Command::SaveNow(tx)) {
            let _ = rx.await;
        }
    }

    /// Stops logging: drops buffered records and schedules nothing further.
    /// A save that is executing is not interrupted.
    pub fn disable(&self, reason: impl Into<String>) {
        self.send(Command::Disable(reason.into()));
    }

    /// Current state, or `None` once the engine has stopped.
    ///
    /// # Panics
    ///
    /// When called from within an async context.
    pub fn status(&self) -> Option<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Status(tx)) {
            return None;
        }
        rx.blocking_recv().ok()
    }

    /// Async version of [`status`](Self::status).
    pub async fn status_async(&self) -> Option<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Status(tx)) {
            return None;
        }
        rx.await.ok()
    }

    /// Final flush, then stops the engine.
    ///
    /// Records that could not be saved by the final flush are discarded; the
    /// number is returned.
    ///
    /// # Panics
    ///
    /// When called from within an async context.
    pub fn shutdown(self) -> usize {
        self.flush();
        self.interrupt.raise();

        let (tx, rx) = oneshot::channel();
        let discarded = if self.send(Command::Stop(tx)) {
            rx.blocking_recv().unwrap_or(0)
        } else {
            0
        };
        if discarded > 0 {
            tracing::warn!(
                storage = %self.storage_type,
                discarded,
                "Trade log shut down with unsaved records, they are discarded"
            );
        }
        discarded
    }

    fn send(&self, command: Command<R>) -> bool {
        if self.commands.send(command).is_err() {
            tracing::trace!(storage = %self.storage_type, "Trade log engine already stopped");
            return false;
        }
        true
    }
}

/// The scheduling context.
struct Scheduler<R: LogRecord> {
    state: EngineState<R>,
    setup: TaskSlot<SetupTask<R>>,
    save: TaskSlot<SaveTask<R>>,
    commands: mpsc::UnboundedReceiver<Command<R>>,
}

impl<R: LogRecord> Scheduler<R> {
    async fn run(mut self) {
        loop {
            let delayed_save = self.state.delayed_save;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(reply) = self.handle(command) {
                            let discarded = self.stop().await;
                            let _ = reply.send(discarded);
                            break;
                        }
                    }
                    None => {
                        let discarded = self.stop().await;
                        if discarded > 0 {
                            tracing::warn!(
                                storage = %self.state.storage_type,
                                discarded,
                                "Trade log dropped with unsaved records, they are discarded"
                            );
                        }
                        break;
                    }
                },
                joined = self.setup.join(), if self.setup.is_executing() => {
                    self.setup.complete(&mut self.state, joined);
                    // Save whatever was buffered while the setup ran
                    self.save_pending();
                }
                joined = self.save.join(), if self.save.is_executing() => {
                    self.save.complete(&mut self.state, joined);
                }
                _ = sleep_until(delayed_save.unwrap_or_else(Instant::now)), if delayed_save.is_some() => {
                    self.state.delayed_save = None;
                    self.save_pending();
                }
            }
        }
        tracing::debug!(storage = %self.state.storage_type, "Trade log engine stopped");
    }

    /// Applies a command. Returns the reply channel if it asks to stop.
    fn handle(&mut self, command: Command<R>) -> Option<oneshot::Sender<usize>> {
        match command {
            Command::Setup => {
                if !self.state.setup_completed && self.setup.is_idle() && self.state.is_enabled() {
                    self.setup.request(&mut self.state);
                }
            }
            Command::Append(record) => {
                if self.state.is_enabled() {
                    self.state.pending.push(record);
                    self.state.schedule_delayed_save();
                } else {
                    tracing::trace!(storage = %self.state.storage_type, "Trade log disabled, record dropped");
                }
            }
            Command::AwaitSetup(reply) => self.setup.await_executions(reply),
            Command::SaveNow(reply) => {
                self.save_pending();
                self.save.await_executions(reply);
            }
            Command::Disable(reason) => self.state.disable(&reason),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Stop(reply) => return Some(reply),
        }
        None
    }

    fn save_pending(&mut self) {
        if !self.state.setup_completed || !self.state.is_enabled() || self.state.pending.is_empty() {
            return;
        }
        self.save.request(&mut self.state);
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            enabled: self.state.is_enabled(),
            setup_completed: self.state.setup_completed,
            pending: self.state.pending.len(),
            save_in_flight: self.save.is_executing(),
            delayed_save_armed: self.state.delayed_save.is_some(),
            save_executions: self.save.executions(),
        }
    }

    /// Lets in-flight executions finish, then drops what is still pending.
    async fn stop(&mut self) -> usize {
        while self.setup.is_executing() || self.save.is_executing() {
            tokio::select! {
                joined = self.setup.join(), if self.setup.is_executing() => {
                    self.setup.complete(&mut self.state, joined);
                }
                joined = self.save.join(), if self.save.is_executing() => {
                    self.save.complete(&mut self.state, joined);
                }
            }
        }
        self.state.enabled.store(false, Ordering::Release);
        self.state.cancel_delayed_save();
        self.state.pending.clear()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
