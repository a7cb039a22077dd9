//! Shared helpers for the engine integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use tokio::runtime::Runtime;
use tradelog::batch::BatchCursor;
use tradelog::record::{LogRecord, SaveOptions};
use tradelog::trade::{ItemRecord, PlayerRecord, ShopRecord, TradeRecord};
use tradelog::writer::{PersistError, PersistResult, RecordWriter};
use tradelog::{EngineConfig, LoggerBuilder, SingleWriterLogger};
use uuid::Uuid;

// =============================================================================
// Records
// =============================================================================

/// Minimal record carrying only an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u32,
    pub at: DateTime<Utc>,
}

impl LogRecord for Event {
    fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }
}

pub fn event(id: u32) -> Event {
    Event {
        id,
        at: Utc::now(),
    }
}

pub fn events(ids: std::ops::RangeInclusive<u32>) -> Vec<Event> {
    ids.map(event).collect()
}

/// A trade of `player` on 2024-05-`day` at `hour`:00:00 UTC.
pub fn trade(day: u32, hour: u32, player: &str) -> TradeRecord {
    TradeRecord::new(
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap(),
        PlayerRecord::new(Uuid::new_v4(), player),
        ShopRecord::new(Uuid::new_v4(), "villager", Some("world".to_string()), 1, 2, 3, None),
        ItemRecord::new("DIAMOND", 1),
        ItemRecord::new("EMERALD", 5),
        None,
        1,
    )
}

// =============================================================================
// Memory writer
// =============================================================================

/// Scripted behavior of one `write_batch` call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Persist up to `n` records, then fail
    FailAfter(usize),
    /// Persist up to `n` records, then panic
    PanicAfter(usize),
}

#[derive(Debug, Default)]
pub struct WriterLog {
    pub persisted: Vec<u32>,
    pub setups: usize,
    pub attempts: usize,
    pub options_seen: Vec<SaveOptions>,
}

/// Shared view of what a [`MemoryWriter`] did.
#[derive(Debug, Clone, Default)]
pub struct WriterProbe {
    log: Arc<Mutex<WriterLog>>,
}

impl WriterProbe {
    pub fn log(&self) -> MutexGuard<'_, WriterLog> {
        self.log.lock().unwrap()
    }

    pub fn persisted(&self) -> Vec<u32> {
        self.log().persisted.clone()
    }

    pub fn attempts(&self) -> usize {
        self.log().attempts
    }

    pub fn setups(&self) -> usize {
        self.log().setups
    }
}

/// Writer that "persists" record ids into a shared log.
pub struct MemoryWriter {
    probe: WriterProbe,
    script: VecDeque<Step>,
    fail_forever: bool,
    fail_setup: bool,
    gate: Option<mpsc::Receiver<()>>,
}

impl MemoryWriter {
    pub fn new() -> (Self, WriterProbe) {
        let probe = WriterProbe::default();
        let writer = Self {
            probe: probe.clone(),
            script: VecDeque::new(),
            fail_forever: false,
            fail_setup: false,
            gate: None,
        };
        (writer, probe)
    }

    /// Scripts the next `write_batch` calls; unscripted calls succeed.
    pub fn script(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.extend(steps);
        self
    }

    pub fn fail_forever(mut self) -> Self {
        self.fail_forever = true;
        self
    }

    pub fn fail_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Every `write_batch` call blocks until a token is sent.
    pub fn gated(mut self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(rx);
        (self, tx)
    }

    fn persist(&self, cursor: &mut BatchCursor<Event>, limit: usize) {
        let mut log = self.probe.log();
        for _ in 0..limit {
            match cursor.peek_next_unsaved() {
                Some(event) => log.persisted.push(event.id),
                None => break,
            }
            cursor.advance();
        }
    }
}

fn injected(message: &str) -> PersistError {
    PersistError::append_failed(message, io::Error::new(io::ErrorKind::Other, "injected failure"))
}

impl RecordWriter<Event> for MemoryWriter {
    fn storage_type(&self) -> &str {
        "memory"
    }

    fn setup(&mut self) -> PersistResult<()> {
        self.probe.log().setups += 1;
        if self.fail_setup {
            return Err(PersistError::setup_failed(
                "memory backend unavailable",
                io::Error::new(io::ErrorKind::NotFound, "no backend"),
            ));
        }
        Ok(())
    }

    fn write_batch(&mut self, cursor: &mut BatchCursor<Event>, options: &SaveOptions) -> PersistResult<()> {
        {
            let mut log = self.probe.log();
            log.attempts += 1;
            log.options_seen.push(*options);
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }

        match self.script.pop_front() {
            Some(Step::FailAfter(n)) => {
                self.persist(cursor, n);
                Err(injected("scripted failure"))
            }
            Some(Step::PanicAfter(n)) => {
                self.persist(cursor, n);
                panic!("scripted panic");
            }
            None if self.fail_forever => Err(injected("backend down")),
            None => {
                self.persist(cursor, usize::MAX);
                Ok(())
            }
        }
    }
}

// =============================================================================
// Engine helpers
// =============================================================================

/// Config with a fast retry delay.
pub fn config(debounce_ms: u64, max_attempts: u32) -> EngineConfig {
    EngineConfig {
        debounce_ms,
        save_max_attempts: max_attempts,
        save_retry_delay_ms: 1,
        ..EngineConfig::default()
    }
}

pub fn runtime() -> Runtime {
    Runtime::new().expect("Failed to create runtime")
}

pub fn start(rt: &Runtime, writer: MemoryWriter, config: EngineConfig) -> SingleWriterLogger<Event> {
    LoggerBuilder::new(config).start_with_writer(Box::new(writer), rt.handle())
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
