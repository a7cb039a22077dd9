//! CSV Trade Log Tests
//!
//! End-to-end tests of the engine with the CSV file backend: bucket files,
//! headers, partial-batch recovery across buckets and setup failures.

mod common;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use common::{runtime, trade};
use serde_json::json;
use tempfile::TempDir;
use tradelog::batch::BatchCursor;
use tradelog::record::{BucketTimeZone, LogRecord, SaveOptions};
use tradelog::trade::{ItemRecord, PlayerRecord, ShopRecord, TradeRecord};
use tradelog::writer::{CsvFileWriter, PersistError, PersistResult, RecordWriter};
use tradelog::{EngineConfig, LoggerBuilder, TradeLogSettings, WriterRegistry};
use uuid::Uuid;

// =============================================================================
// Test Utilities
// =============================================================================

/// CSV writer that fails a number of times right before the first record of
/// a given day.
struct FaultyCsvWriter {
    inner: CsvFileWriter<TradeRecord>,
    fail_before: NaiveDate,
    failures_left: usize,
    attempts: Arc<AtomicUsize>,
}

impl RecordWriter<TradeRecord> for FaultyCsvWriter {
    fn storage_type(&self) -> &str {
        "csv"
    }

    fn setup(&mut self) -> PersistResult<()> {
        self.inner.setup()
    }

    fn write_batch(&mut self, cursor: &mut BatchCursor<TradeRecord>, options: &SaveOptions) -> PersistResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        while let Some(next) = cursor.peek_next_unsaved() {
            if next.timestamp().date_naive() == self.fail_before && self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(PersistError::append_failed(
                    "injected failure",
                    io::Error::new(io::ErrorKind::Other, "disk unavailable"),
                ));
            }
            self.inner.write_bucket(cursor, options)?;
        }
        Ok(())
    }
}

fn bucket(data_dir: &Path, date: &str) -> PathBuf {
    data_dir.join("trade-logs").join(format!("trades-{}.csv", date))
}

fn config(data_dir: &Path) -> EngineConfig {
    EngineConfig {
        debounce_ms: 60_000,
        save_retry_delay_ms: 1,
        ..EngineConfig::with_data_folder(data_dir)
    }
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("bucket file missing")
        .lines()
        .map(str::to_string)
        .collect()
}

fn is_header(line: &str) -> bool {
    line.starts_with("\"time\",\"player_uuid\"")
}

/// Splits one line of fully quoted fields the way a standard CSV reader does.
fn read_quoted_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    while chars.next() == Some('"') {
        let mut field = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                    continue;
                }
                break;
            }
            field.push(c);
        }
        fields.push(field);
        // Field separator
        chars.next();
    }
    fields
}

// =============================================================================
// Partial-batch failure across buckets
// =============================================================================

#[test]
fn test_failure_between_buckets_resumes_without_duplicates() {
    let temp_dir = TempDir::new().unwrap();
    let rt = runtime();
    let attempts = Arc::new(AtomicUsize::new(0));
    let writer = FaultyCsvWriter {
        inner: CsvFileWriter::new(temp_dir.path(), BucketTimeZone::Utc),
        fail_before: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
        failures_left: 3,
        attempts: Arc::clone(&attempts),
    };
    let logger = LoggerBuilder::new(config(temp_dir.path())).start_with_writer(Box::new(writer), rt.handle());

    logger.setup();
    logger.flush();
    logger.append(trade(1, 10, "A"));
    logger.append(trade(1, 11, "B"));
    logger.append(trade(2, 9, "C"));
    logger.flush();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let day1 = lines(&bucket(temp_dir.path(), "2024-05-01"));
    assert_eq!(day1.len(), 3);
    assert!(is_header(&day1[0]));
    assert!(day1[1].starts_with("\"10:00:00\"") && day1[1].contains("\"A\""));
    assert!(day1[2].starts_with("\"11:00:00\"") && day1[2].contains("\"B\""));

    let day2 = lines(&bucket(temp_dir.path(), "2024-05-02"));
    assert_eq!(day2.len(), 2);
    assert!(is_header(&day2[0]));
    assert!(day2[1].starts_with("\"09:00:00\"") && day2[1].contains("\"C\""));

    assert_eq!(logger.shutdown(), 0);
}

// =============================================================================
// Engine with the default registry
// =============================================================================

#[test]
fn test_registry_csv_backend_writes_daily_buckets() {
    let temp_dir = TempDir::new().unwrap();
    let rt = runtime();
    let registry: WriterRegistry<TradeRecord> = WriterRegistry::with_defaults();
    let logger = LoggerBuilder::new(config(temp_dir.path()))
        .start(&registry, rt.handle())
        .unwrap();
    assert_eq!(logger.storage_type(), "csv");

    logger.setup();
    logger.append(trade(3, 8, "alice"));
    logger.append(trade(3, 9, "bob"));
    logger.append(trade(4, 7, "carol"));
    assert_eq!(logger.shutdown(), 0);

    let day3 = lines(&bucket(temp_dir.path(), "2024-05-03"));
    assert_eq!(day3.len(), 3);
    assert!(day3[1].contains("\"alice\""));
    assert!(day3[2].contains("\"bob\""));
    assert_eq!(day3[1].split("\",\"").count(), 21);

    let day4 = lines(&bucket(temp_dir.path(), "2024-05-04"));
    assert_eq!(day4.len(), 2);
    assert!(day4[1].contains("\"carol\""));
}

#[test]
fn test_second_engine_appends_without_second_header() {
    let temp_dir = TempDir::new().unwrap();
    let rt = runtime();
    let registry: WriterRegistry<TradeRecord> = WriterRegistry::with_defaults();

    for player in ["first", "second"] {
        let logger = LoggerBuilder::new(config(temp_dir.path()))
            .start(&registry, rt.handle())
            .unwrap();
        logger.setup();
        logger.append(trade(5, 12, player));
        assert_eq!(logger.shutdown(), 0);
    }

    let day5 = lines(&bucket(temp_dir.path(), "2024-05-05"));
    assert_eq!(day5.iter().filter(|line| is_header(line)).count(), 1);
    assert_eq!(day5.len(), 3);
}

#[test]
fn test_item_metadata_follows_settings() {
    let temp_dir = TempDir::new().unwrap();
    let rt = runtime();
    let settings = Arc::new(TradeLogSettings::new(false));
    let registry: WriterRegistry<TradeRecord> = WriterRegistry::with_defaults();
    let logger = LoggerBuilder::new(config(temp_dir.path()))
        .settings(Arc::clone(&settings))
        .start(&registry, rt.handle())
        .unwrap();

    let mut metadata = serde_json::Map::new();
    metadata.insert("enchanted".to_string(), json!(true));
    let make = |hour| {
        TradeRecord::new(
            Utc.with_ymd_and_hms(2024, 5, 6, hour, 0, 0).unwrap(),
            PlayerRecord::new(Uuid::nil(), "dave"),
            ShopRecord::new(Uuid::nil(), "sign", None, 0, 0, 0, None),
            ItemRecord::new("BOW", 1).with_metadata(metadata.clone()),
            ItemRecord::new("GOLD_INGOT", 3),
            None,
            1,
        )
    };

    logger.setup();
    logger.append(make(10));
    logger.flush();
    settings.set_log_item_metadata(true);
    logger.append(make(11));
    assert_eq!(logger.shutdown(), 0);

    let day6 = lines(&bucket(temp_dir.path(), "2024-05-06"));
    assert!(!day6[1].contains("enchanted"));
    assert!(day6[2].contains(r#"""enchanted"":true"#));
}

#[test]
fn test_metadata_json_reads_back_from_standard_csv() {
    let temp_dir = TempDir::new().unwrap();
    let rt = runtime();
    let registry: WriterRegistry<TradeRecord> = WriterRegistry::with_defaults();
    let logger = LoggerBuilder::new(config(temp_dir.path()))
        .settings(Arc::new(TradeLogSettings::new(true)))
        .start(&registry, rt.handle())
        .unwrap();

    let mut metadata = serde_json::Map::new();
    metadata.insert("name".to_string(), json!("a\"b\\c\nd"));
    logger.setup();
    logger.append(TradeRecord::new(
        Utc.with_ymd_and_hms(2024, 5, 7, 10, 0, 0).unwrap(),
        PlayerRecord::new(Uuid::nil(), "two\nlines"),
        ShopRecord::new(Uuid::nil(), "sign", None, 0, 0, 0, None),
        ItemRecord::new("BOW", 1).with_metadata(metadata.clone()),
        ItemRecord::new("GOLD_INGOT", 3),
        None,
        1,
    ));
    assert_eq!(logger.shutdown(), 0);

    let day7 = lines(&bucket(temp_dir.path(), "2024-05-07"));
    assert_eq!(day7.len(), 2);

    let fields = read_quoted_fields(&day7[1]);
    assert_eq!(fields.len(), 21);
    assert_eq!(fields[2], r"two\nlines");
    let result_metadata: serde_json::Value = serde_json::from_str(&fields[19]).unwrap();
    assert_eq!(result_metadata, serde_json::Value::Object(metadata));
}

// =============================================================================
// Setup failures
// =============================================================================

#[test]
fn test_unusable_data_folder_disables_engine() {
    let temp_dir = TempDir::new().unwrap();
    let occupied = temp_dir.path().join("not-a-folder");
    fs::write(&occupied, b"plain file").unwrap();

    let rt = runtime();
    let registry: WriterRegistry<TradeRecord> = WriterRegistry::with_defaults();
    let logger = LoggerBuilder::new(config(&occupied))
        .start(&registry, rt.handle())
        .unwrap();

    logger.append(trade(1, 1, "lost"));
    logger.setup();
    logger.flush();

    assert!(!logger.is_enabled());
    logger.append(trade(1, 2, "ignored"));
    let status = logger.status().unwrap();
    assert_eq!(status.pending, 0);
    assert_eq!(logger.shutdown(), 0);
}
