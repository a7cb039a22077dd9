//! tradelog - A buffered single-writer persistence engine for append-only trade logs
//!
//! Records are buffered in memory, batched by a debounced save and persisted
//! strictly in arrival order by exactly one writer. A save that fails part
//! way resumes at the first unsaved record; nothing is written twice.
//!
//! ```ignore
//! use tradelog::{EngineConfig, LoggerBuilder, WriterRegistry};
//!
//! let logger = LoggerBuilder::new(EngineConfig::with_data_folder("plugins/shops"))
//!     .start(&WriterRegistry::with_defaults(), runtime.handle())?;
//! logger.setup();
//! logger.append(trade);
//! // ...
//! logger.shutdown();
//! ```

pub mod batch;
pub mod config;
pub mod crash_point;
pub mod notify;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod trade;
pub mod writer;

pub use batch::{BatchCursor, PendingQueue};
pub use config::{ConfigError, EngineConfig, TradeLogSettings};
pub use notify::{FailureNotifier, OperatorSession, SessionRegistry, ADMIN_PERMISSION};
pub use record::{BucketTimeZone, CsvRecord, LogRecord, SaveOptions, SqlRecord, SqlValue};
pub use retry::{Interrupt, RetryPolicy};
pub use scheduler::{EngineError, EngineStatus, LoggerBuilder, SingleWriterLogger};
pub use trade::{ItemRecord, PlayerRecord, ShopRecord, TradeLogger, TradeRecord};
pub use writer::{CsvFileWriter, CsvFormatter, PersistError, PersistErrorCode, PersistResult, RecordWriter, WriterRegistry};
#[cfg(feature = "sqlite")]
pub use writer::SqliteWriter;
