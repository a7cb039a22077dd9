//! Writers: durable, record-at-a-time persistence backends
//!
//! A writer drains a [`BatchCursor`] as far as it can:
//! - each record is durably appended before the cursor is advanced past it
//! - the first failure stops the attempt and is returned
//! - a later attempt resumes at the cursor
//!
//! Exactly one writer instance serves one engine, and only one of its
//! methods runs at any time. It is moved to the worker thread for each
//! execution and moved back afterwards.

pub mod csv;
mod errors;
pub mod fs;
mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use csv::{CsvFileWriter, CsvFormatter};
pub use errors::{PersistError, PersistErrorCode, PersistResult, Severity};
pub use registry::{WriterFactory, WriterRegistry};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteWriter;

use crate::batch::BatchCursor;
use crate::record::SaveOptions;

/// A durable, single-writer persistence backend.
pub trait RecordWriter<R>: Send + 'static {
    /// Name of the storage type, used in log events.
    fn storage_type(&self) -> &str;

    /// One-time initialization. Runs on a worker thread.
    ///
    /// A failure here disables the engine.
    fn setup(&mut self) -> PersistResult<()>;

    /// Persists the unsaved records of `cursor`, in order.
    ///
    /// Only advances the cursor after the durable append of a record. Returns
    /// the first error; records before it stay persisted.
    fn write_batch(&mut self, cursor: &mut BatchCursor<R>, options: &SaveOptions) -> PersistResult<()>;
}
