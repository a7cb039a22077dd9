//! CSV file writer: one bucket file per calendar day
//!
//! Layout: `<data_folder>/trade-logs/trades-YYYY-MM-DD.csv`.
//!
//! Append protocol per bucket session:
//! 1. Ensure the folder exists and is writable
//! 2. Classify the bucket as new, empty or non-empty
//! 3. Open it for append; a new file is created exclusively and its
//!    directory entry is fsynced before any content is written
//! 4. New or empty buckets get the header row first
//! 5. Each record is one `write_all` followed by `sync_data`; the cursor is
//!    advanced only afterwards
//! 6. The session ends when the batch is drained or the next record belongs
//!    to a different bucket
//!
//! Every write goes straight to the unbuffered `File`: nothing is held in a
//! userspace buffer between the write and its sync.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};

use super::errors::{PersistError, PersistResult};
use super::fs::{self as bucket_fs, BucketState};
use super::RecordWriter;
use crate::batch::BatchCursor;
use crate::config::EngineConfig;
use crate::crash_point::{maybe_crash, points};
use crate::record::{BucketTimeZone, CsvRecord, SaveOptions};

/// Name of the storage type served by [`CsvFileWriter`].
pub const STORAGE_TYPE: &str = "csv";

/// Folder below the data folder that holds the bucket files.
pub const TRADE_LOGS_FOLDER: &str = "trade-logs";

const FILE_NAME_PREFIX: &str = "trades-";
const FILE_EXTENSION: &str = ".csv";

/// Formats fields as comma separated values.
///
/// Defaults:
/// - comma field separator, LF record separator
/// - every field quoted with `"`, quotes inside fields doubled
/// - backslashes and line breaks inside fields escaped, so that each record
///   occupies exactly one line
/// - a warning is logged for every field containing a line break
/// - absent fields are written as the empty string
#[derive(Debug, Clone)]
pub struct CsvFormatter {
    field_separator: String,
    record_separator: String,
    quote: String,
    escaped_quote: String,
    quote_all_fields: bool,
    escape_newlines: bool,
    warn_on_newlines: bool,
    null_field: String,
}

impl Default for CsvFormatter {
    fn default() -> Self {
        Self {
            field_separator: ",".to_string(),
            record_separator: "\n".to_string(),
            quote: "\"".to_string(),
            escaped_quote: "\"\"".to_string(),
            quote_all_fields: true,
            escape_newlines: true,
            warn_on_newlines: true,
            null_field: String::new(),
        }
    }
}

impl CsvFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the field separator. Ignored if empty.
    pub fn field_separator(mut self, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        if !separator.is_empty() {
            self.field_separator = separator;
        }
        self
    }

    /// Sets the record separator. Ignored if empty.
    pub fn record_separator(mut self, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        if !separator.is_empty() {
            self.record_separator = separator;
        }
        self
    }

    /// Sets the quote. An empty quote disables quoting entirely.
    pub fn quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = quote.into();
        self
    }

    /// Sets the replacement for quotes inside quoted fields.
    pub fn escaped_quote(mut self, escaped_quote: impl Into<String>) -> Self {
        self.escaped_quote = escaped_quote.into();
        self
    }

    /// Whether every field is quoted, or only fields that need it.
    pub fn quote_all_fields(mut self, quote_all_fields: bool) -> Self {
        self.quote_all_fields = quote_all_fields;
        self
    }

    /// Whether backslashes and line breaks inside fields are escaped.
    pub fn escape_newlines(mut self, escape_newlines: bool) -> Self {
        self.escape_newlines = escape_newlines;
        self
    }

    /// Whether a warning is logged for fields containing line breaks.
    pub fn warn_on_newlines(mut self, warn_on_newlines: bool) -> Self {
        self.warn_on_newlines = warn_on_newlines;
        self
    }

    /// Sets the text written for absent fields.
    pub fn null_field(mut self, null_field: impl Into<String>) -> Self {
        self.null_field = null_field.into();
        self
    }

    /// Escapes and, if required, quotes a single field.
    pub fn escape_field(&self, field: Option<&str>) -> String {
        let raw = field.unwrap_or(&self.null_field);
        let contains_newline = raw.contains(['\n', '\r']);

        if self.warn_on_newlines && contains_newline {
            tracing::warn!(field = raw, "CSV field contains a newline character");
        }

        let mut escaped = if self.escape_newlines {
            escape_newlines(raw).into_owned()
        } else {
            raw.to_string()
        };

        if !self.quote.is_empty() {
            let contains_quote = escaped.contains(self.quote.as_str());
            let record_separator_is_line_break = self.record_separator.contains(['\n', '\r']);
            let needs_quotes = self.quote_all_fields
                || contains_quote
                || (!self.escape_newlines && contains_newline)
                || escaped.contains(self.field_separator.as_str())
                || (!record_separator_is_line_break && escaped.contains(self.record_separator.as_str()));
            if needs_quotes {
                if contains_quote {
                    escaped = escaped.replace(self.quote.as_str(), &self.escaped_quote);
                }
                escaped = format!("{}{}{}", self.quote, escaped, self.quote);
            }
        }
        escaped
    }

    /// Joins the escaped fields, without the record separator.
    pub fn format_fields<I, S>(&self, fields: I) -> String
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let escaped: Vec<String> = fields
            .into_iter()
            .map(|field| self.escape_field(field.as_ref().map(|s| s.as_ref())))
            .collect();
        escaped.join(&self.field_separator)
    }

    /// Formats one complete record, including the record separator.
    pub fn format_record<I, S>(&self, fields: I) -> String
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut record = self.format_fields(fields);
        record.push_str(&self.record_separator);
        record
    }
}

/// Escapes backslashes and line breaks, so that the text fits on one line.
///
/// Returns the text unchanged if it contains neither.
pub fn escape_newlines(text: &str) -> Cow<'_, str> {
    if !text.contains(['\\', '\n', '\r']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "\\r"))
}

/// Appends CSV records to daily bucket files.
///
/// Records are expected to be single-line already (see [`escape_newlines`]):
/// the formatter only quotes, so structured fields such as JSON keep their
/// backslashes as they are. A line break that slips through is logged.
pub struct CsvFileWriter<R> {
    folder: PathBuf,
    time_zone: BucketTimeZone,
    formatter: CsvFormatter,
    /// Ends a bucket session; every record is already synced at this point.
    close_bucket: fn(&File) -> io::Result<()>,
    _records: PhantomData<fn(R)>,
}

impl<R> std::fmt::Debug for CsvFileWriter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvFileWriter")
            .field("folder", &self.folder)
            .field("time_zone", &self.time_zone)
            .finish()
    }
}

impl<R: CsvRecord> CsvFileWriter<R> {
    /// Creates a writer storing its buckets in `<data_folder>/trade-logs`.
    pub fn new(data_folder: impl AsRef<Path>, time_zone: BucketTimeZone) -> Self {
        Self {
            folder: data_folder.as_ref().join(TRADE_LOGS_FOLDER),
            time_zone,
            formatter: CsvFormatter::new().escape_newlines(false).warn_on_newlines(true),
            close_bucket: File::sync_all,
            _records: PhantomData,
        }
    }

    /// Creates a writer from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.data_folder(), config.bucket_time_zone())
    }

    /// Replaces the formatter.
    pub fn with_formatter(mut self, formatter: CsvFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Folder holding the bucket files.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the bucket file for the given calendar date.
    pub fn bucket_path_for_date(&self, date: NaiveDate) -> PathBuf {
        self.folder.join(format!(
            "{}{}{}",
            FILE_NAME_PREFIX,
            date.format("%Y-%m-%d"),
            FILE_EXTENSION
        ))
    }

    /// Path of the bucket file a record with this timestamp belongs to.
    pub fn bucket_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.bucket_path_for_date(self.time_zone.date_of(timestamp))
    }

    /// Runs one bucket session.
    ///
    /// Writes the next unsaved record and every following record of the same
    /// bucket, advancing the cursor after each durable append. Returns at the
    /// bucket boundary, when the batch is drained, or at the first failure.
    pub fn write_bucket(&mut self, cursor: &mut BatchCursor<R>, options: &SaveOptions) -> PersistResult<()> {
        let bucket_date = match cursor.peek_next_unsaved() {
            Some(record) => self.time_zone.date_of(record.timestamp()),
            None => return Ok(()),
        };
        let path = self.bucket_path_for_date(bucket_date);

        bucket_fs::create_dirs(&self.folder)?;
        bucket_fs::check_dir_writable(&self.folder)?;

        let state = BucketState::of(&path).map_err(|e| {
            PersistError::append_failed(format!("Could not inspect bucket: {}", path.display()), e)
        })?;
        if !state.is_new() {
            bucket_fs::check_file_writable(&path)?;
        }

        let mut file = open_bucket(&path, state.is_new())?;
        if state.is_new() {
            bucket_fs::fsync_parent_dir(&path).map_err(|e| {
                PersistError::fsync_failed("Could not sync directory of new bucket", e)
                    .with_details(format!("path: {}", path.display()))
            })?;
            maybe_crash(points::CSV_AFTER_CREATE);
        }

        if state.needs_header() {
            let header = self.formatter.format_record(R::csv_header().iter().map(|h| Some(*h)));
            append_line(&mut file, &path, &header)?;
            maybe_crash(points::CSV_AFTER_HEADER);
        }

        while let Some(record) = cursor.peek_next_unsaved() {
            if self.time_zone.date_of(record.timestamp()) != bucket_date {
                break;
            }
            let line = self.formatter.format_record(record.csv_fields(options, self.time_zone));
            append_line(&mut file, &path, &line)?;
            maybe_crash(points::CSV_AFTER_RECORD);
            cursor.advance();
        }

        // Every record is already synced; a failure here loses nothing.
        if let Err(e) = (self.close_bucket)(&file) {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to close trade log file after writing; records are considered persisted"
            );
        }
        Ok(())
    }
}

impl<R: CsvRecord> RecordWriter<R> for CsvFileWriter<R> {
    fn storage_type(&self) -> &str {
        STORAGE_TYPE
    }

    fn setup(&mut self) -> PersistResult<()> {
        std::fs::create_dir_all(&self.folder).map_err(|e| {
            PersistError::setup_failed(
                format!("Could not create trade logs folder: {}", self.folder.display()),
                e,
            )
        })?;
        bucket_fs::check_dir_writable(&self.folder)
    }

    fn write_batch(&mut self, cursor: &mut BatchCursor<R>, options: &SaveOptions) -> PersistResult<()> {
        while cursor.has_unsaved() {
            self.write_bucket(cursor, options)?;
        }
        Ok(())
    }
}

fn open_bucket(path: &Path, is_new: bool) -> PersistResult<File> {
    let mut options = OpenOptions::new();
    options.append(true);
    if is_new {
        options.create_new(true);
    }
    options.open(path).map_err(|e| {
        PersistError::append_failed(format!("Could not open bucket: {}", path.display()), e)
    })
}

fn append_line(file: &mut File, path: &Path, line: &str) -> PersistResult<()> {
    file.write_all(line.as_bytes()).map_err(|e| {
        PersistError::append_failed("Could not append to bucket", e)
            .with_details(format!("path: {}", path.display()))
    })?;
    file.sync_data().map_err(|e| {
        PersistError::fsync_failed("Could not sync bucket after append", e)
            .with_details(format!("path: {}", path.display()))
    })
}
