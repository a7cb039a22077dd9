//! SQLite trade database
//!
//! All records go into a single database file, `<data_folder>/trade-logs/trades.db`.
//! Every record is inserted by its own autocommit statement with
//! `synchronous = FULL`: once the insert returns, the row is durable and the
//! cursor moves past it. A failed insert leaves no partial row behind.

use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use super::csv::TRADE_LOGS_FOLDER;
use super::errors::{PersistError, PersistResult};
use super::fs as bucket_fs;
use super::RecordWriter;
use crate::batch::BatchCursor;
use crate::config::EngineConfig;
use crate::crash_point::{maybe_crash, points};
use crate::record::{SaveOptions, SqlRecord, SqlValue};

/// Storage type name of the SQLite backend.
pub const STORAGE_TYPE: &str = "sqlite";

/// File name of the trade database.
pub const DATABASE_FILE_NAME: &str = "trades.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Inserts records into an SQLite database, one transaction per record.
pub struct SqliteWriter<R> {
    path: PathBuf,
    connection: Option<Connection>,
    _records: PhantomData<fn(R)>,
}

impl<R> fmt::Debug for SqliteWriter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteWriter")
            .field("path", &self.path)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl<R: SqlRecord> SqliteWriter<R> {
    /// Creates a writer for `<data_folder>/trade-logs/trades.db`.
    pub fn new(data_folder: impl AsRef<Path>) -> Self {
        Self {
            path: data_folder
                .as_ref()
                .join(TRADE_LOGS_FOLDER)
                .join(DATABASE_FILE_NAME),
            connection: None,
            _records: PhantomData,
        }
    }

    /// Creates a writer from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.data_folder())
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let connection = Connection::open(&self.path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.pragma_update(None, "synchronous", "FULL")?;
        Ok(connection)
    }

    /// The open connection; reopened if a previous attempt dropped it.
    fn connection(&mut self) -> PersistResult<&Connection> {
        if self.connection.is_none() {
            let connection = self.open().map_err(|e| {
                PersistError::append_failed("Could not open trade database", sql_error(e))
                    .with_details(format!("path: {}", self.path.display()))
            })?;
            self.connection = Some(connection);
        }
        match &self.connection {
            Some(connection) => Ok(connection),
            None => Err(PersistError::append_failed(
                "Trade database is not open",
                io::Error::new(io::ErrorKind::NotConnected, "no connection"),
            )),
        }
    }

    fn insert(connection: &Connection, record: &R, options: &SaveOptions) -> rusqlite::Result<()> {
        let mut statement = connection.prepare_cached(R::sql_insert())?;
        statement.execute(params_from_iter(record.sql_values(options).into_iter().map(to_sql_value)))?;
        Ok(())
    }
}

impl<R: SqlRecord> RecordWriter<R> for SqliteWriter<R> {
    fn storage_type(&self) -> &str {
        STORAGE_TYPE
    }

    fn setup(&mut self) -> PersistResult<()> {
        let folder = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(folder).map_err(|e| {
            PersistError::setup_failed(
                format!("Could not create trade logs folder: {}", folder.display()),
                e,
            )
        })?;
        bucket_fs::check_dir_writable(folder)?;

        let connection = self
            .open()
            .and_then(|connection| {
                connection.execute_batch(R::sql_create_table())?;
                Ok(connection)
            })
            .map_err(|e| {
                PersistError::setup_failed("Could not create trades table", sql_error(e))
                    .with_details(format!("path: {}", self.path.display()))
            })?;
        self.connection = Some(connection);
        Ok(())
    }

    fn write_batch(&mut self, cursor: &mut BatchCursor<R>, options: &SaveOptions) -> PersistResult<()> {
        while let Some(record) = cursor.peek_next_unsaved() {
            let connection = self.connection()?;
            if let Err(e) = Self::insert(connection, record, options) {
                // Start the next attempt from a fresh connection.
                self.connection = None;
                return Err(PersistError::append_failed("Could not insert trade", sql_error(e))
                    .with_details(format!("path: {}", self.path.display())));
            }
            maybe_crash(points::SQLITE_AFTER_INSERT);
            cursor.advance();
        }
        Ok(())
    }
}

fn to_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Text(s) => Value::Text(s),
    }
}

fn sql_error(e: rusqlite::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}
