//! Singleton tasks: at most one execution in flight
//!
//! A [`SingletonTask`] runs in three phases split across two contexts:
//!
//! 1. `prepare` runs on the scheduling context and captures everything the
//!    execution needs into an owned job
//! 2. `execute` runs on a blocking worker thread; it only sees the job
//! 3. `callback` runs on the scheduling context again and reacts to the
//!    outcome
//!
//! A [`TaskSlot`] drives one task through the phases
//! `Idle → Preparing → Executing → Callback → Idle`. Requests that arrive
//! while an execution is in flight are coalesced into a single re-run that
//! starts right after the current callback.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

/// A unit of work with prepare/execute/callback phases.
pub trait SingletonTask: Send + 'static {
    /// Scheduler-owned state the task reads in `prepare` and `callback`.
    type State;
    /// Everything `execute` needs, moved to the worker.
    type Job: Send + 'static;
    /// Result of `execute`, moved back to the scheduling context.
    type Outcome: Send + 'static;

    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Captures the job. Runs on the scheduling context.
    fn prepare(&mut self, state: &mut Self::State) -> Self::Job;

    /// Performs the work. Runs on a worker thread and may block.
    fn execute(job: Self::Job) -> Self::Outcome;

    /// Reacts to the outcome. Runs on the scheduling context.
    fn callback(&mut self, state: &mut Self::State, outcome: Self::Outcome, timing: &ExecutionTiming);

    /// Called instead of `callback` when the execution never produced an
    /// outcome (the worker panicked or the runtime shut down).
    fn aborted(&mut self, state: &mut Self::State, reason: &str);
}

/// Lifecycle phase of a [`TaskSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// No execution in progress.
    Idle,
    /// `prepare` is running.
    Preparing,
    /// `execute` is running (or queued) on a worker.
    Executing,
    /// `callback` is running.
    Callback,
}

/// What happened to a request to run the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    /// A new execution was prepared and started.
    Started,
    /// An execution is in flight; a single re-run is queued behind it.
    Coalesced,
}

/// Timing statistics of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionTiming {
    /// Time spent in `prepare`.
    pub preparation: Duration,
    /// Time between the end of `prepare` and the worker picking up the job.
    pub execution_delay: Duration,
    /// Time spent in `execute`.
    pub execution: Duration,
    /// Time from the start of `prepare` to the start of `callback`.
    pub total: Duration,
}

impl fmt::Display for ExecutionTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}ms (prep {:.2}ms, delay {:.2}ms, exec {:.2}ms)",
            millis(self.total),
            millis(self.preparation),
            millis(self.execution_delay),
            millis(self.execution),
        )
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Outcome of a finished worker execution, with its timestamps.
#[derive(Debug)]
pub struct Completed<O> {
    outcome: O,
    started: Instant,
    finished: Instant,
}

/// Marks when the current execution was requested and prepared.
#[derive(Debug, Clone, Copy)]
struct ExecutionStart {
    requested: Instant,
    prepared: Instant,
}

/// Drives a [`SingletonTask`], guaranteeing at most one execution in flight.
pub struct TaskSlot<T: SingletonTask> {
    task: T,
    runtime: Handle,
    phase: TaskPhase,
    in_flight: Option<JoinHandle<Completed<T::Outcome>>>,
    start: Option<ExecutionStart>,
    run_again: bool,
    waiters: Vec<oneshot::Sender<()>>,
    executions: u64,
}

impl<T: SingletonTask> fmt::Debug for TaskSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSlot")
            .field("task", &self.task.name())
            .field("phase", &self.phase)
            .field("run_again", &self.run_again)
            .field("waiters", &self.waiters.len())
            .field("executions", &self.executions)
            .finish()
    }
}

impl<T: SingletonTask> TaskSlot<T> {
    /// Create an idle slot whose executions run on `runtime`'s blocking pool.
    pub fn new(task: T, runtime: Handle) -> Self {
        Self {
            task,
            runtime,
            phase: TaskPhase::Idle,
            in_flight: None,
            start: None,
            run_again: false,
            waiters: Vec::new(),
            executions: 0,
        }
    }

    /// The wrapped task.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Current phase.
    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Whether no execution is in progress.
    pub fn is_idle(&self) -> bool {
        self.phase == TaskPhase::Idle
    }

    /// Whether an execution is running on a worker.
    pub fn is_executing(&self) -> bool {
        self.phase == TaskPhase::Executing
    }

    /// Whether a re-run is queued behind the current execution.
    pub fn is_rerun_queued(&self) -> bool {
        self.run_again
    }

    /// Number of executions started so far.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Requests an execution.
    ///
    /// Starts one right away when idle, otherwise queues a single re-run.
    /// Must not be called from within `prepare` or `callback`.
    pub fn request(&mut self, state: &mut T::State) -> RunRequest {
        debug_assert!(
            !matches!(self.phase, TaskPhase::Preparing | TaskPhase::Callback),
            "task '{}' requested from within its own execution",
            self.task.name()
        );

        if self.phase != TaskPhase::Idle {
            self.run_again = true;
            return RunRequest::Coalesced;
        }

        self.start(state);
        RunRequest::Started
    }

    /// Answers `waiter` once the current execution and any queued re-run
    /// have completed. Answers right away if the slot is idle.
    pub fn await_executions(&mut self, waiter: oneshot::Sender<()>) {
        if self.is_idle() {
            let _ = waiter.send(());
        } else {
            self.waiters.push(waiter);
        }
    }

    /// Waits for the in-flight execution to finish.
    ///
    /// Never resolves while nothing is executing, so it can be raced in a
    /// `select!` guarded by [`is_executing`](Self::is_executing).
    pub async fn join(&mut self) -> Result<Completed<T::Outcome>, JoinError> {
        match self.in_flight.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    }

    /// Runs the callback for a finished execution, then starts the queued
    /// re-run or releases the waiters.
    pub fn complete(&mut self, state: &mut T::State, joined: Result<Completed<T::Outcome>, JoinError>) {
        debug_assert_eq!(self.phase, TaskPhase::Executing);
        self.in_flight = None;
        let start = self.start.take();

        self.phase = TaskPhase::Callback;
        match joined {
            Ok(completed) => {
                let timing = match start {
                    Some(start) => ExecutionTiming {
                        preparation: start.prepared.saturating_duration_since(start.requested),
                        execution_delay: completed.started.saturating_duration_since(start.prepared),
                        execution: completed.finished.saturating_duration_since(completed.started),
                        total: start.requested.elapsed(),
                    },
                    None => ExecutionTiming::default(),
                };
                self.task.callback(state, completed.outcome, &timing);
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "worker panicked".to_string()
                } else {
                    format!("worker cancelled: {}", e)
                };
                tracing::error!(task = self.task.name(), reason = %reason, "task execution aborted");
                self.task.aborted(state, &reason);
            }
        }
        self.phase = TaskPhase::Idle;

        if self.run_again {
            self.run_again = false;
            self.start(state);
        } else {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn start(&mut self, state: &mut T::State) {
        let requested = Instant::now();
        self.phase = TaskPhase::Preparing;
        let job = self.task.prepare(state);
        let prepared = Instant::now();

        self.phase = TaskPhase::Executing;
        self.start = Some(ExecutionStart { requested, prepared });
        self.executions += 1;
        self.in_flight = Some(self.runtime.spawn_blocking(move || {
            let started = Instant::now();
            let outcome = T::execute(job);
            Completed {
                outcome,
                started,
                finished: Instant::now(),
            }
        }));
    }
}
