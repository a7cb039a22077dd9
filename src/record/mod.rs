//! Record contracts consumed by the persistence engine
//!
//! The engine itself never looks inside a record. It only needs:
//! - a logical timestamp, used to route the record to a storage bucket
//! - for the CSV backend, a fixed header and one row of fields per record
//! - for the SQLite backend, a table definition and one row of values
//!
//! Records are immutable once handed to the engine.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable, opaque unit of log data.
pub trait LogRecord: Send + 'static {
    /// Logical timestamp of the record. Determines the bucket it is stored in.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// A record that can be serialized as one CSV row.
pub trait CsvRecord: LogRecord {
    /// Header row written at the top of every new or empty bucket.
    fn csv_header() -> &'static [&'static str];

    /// Field values, in header order.
    ///
    /// `None` marks an absent value (rendered as the formatter's null field).
    /// Fields must not contain line breaks; free text goes through
    /// [`crate::writer::csv::escape_newlines`].
    fn csv_fields(&self, options: &SaveOptions, time_zone: BucketTimeZone) -> Vec<Option<String>>;
}

/// A column value of an SQL row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

/// A record that can be stored as one row of an SQL table.
pub trait SqlRecord: LogRecord {
    /// `CREATE TABLE IF NOT EXISTS` statement of the record table.
    fn sql_create_table() -> &'static str;

    /// Parameterized `INSERT` statement for one record.
    fn sql_insert() -> &'static str;

    /// Parameter values of [`SqlRecord::sql_insert`], in order.
    fn sql_values(&self, options: &SaveOptions) -> Vec<SqlValue>;
}

/// Per-batch snapshot of the externally configurable settings.
///
/// Taken once in the save task's prepare phase, so that every record of a
/// batch is serialized with the same settings even if they change mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveOptions {
    /// Whether extended per-record metadata is serialized.
    pub log_item_metadata: bool,
}

/// Time zone used to derive bucket dates and wall-clock columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketTimeZone {
    /// Coordinated universal time
    #[default]
    Utc,
    /// The system's local time zone
    Local,
}

impl BucketTimeZone {
    /// Calendar date of the timestamp in this zone.
    pub fn date_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        match self {
            BucketTimeZone::Utc => timestamp.date_naive(),
            BucketTimeZone::Local => timestamp.with_timezone(&Local).date_naive(),
        }
    }

    /// Wall-clock time of the timestamp in this zone.
    pub fn time_of(&self, timestamp: DateTime<Utc>) -> NaiveTime {
        match self {
            BucketTimeZone::Utc => timestamp.time(),
            BucketTimeZone::Local => timestamp.with_timezone(&Local).time(),
        }
    }
}
