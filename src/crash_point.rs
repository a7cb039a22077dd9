//! Crash point injection for durability testing
//!
//! A crash point is enabled through the `TRADELOG_CRASH_POINT` environment
//! variable. When the writer passes an enabled point, the process terminates
//! via `std::process::abort()`: no cleanup, no unwinding, no flushing of
//! buffered records.
//!
//! ```bash
//! TRADELOG_CRASH_POINT=csv_after_header ./server
//! ```
//!
//! Whatever a bucket file holds afterwards is what a real crash at that point
//! would leave behind.

use std::sync::OnceLock;

/// Name of the environment variable selecting the crash point.
pub const CRASH_POINT_ENV: &str = "TRADELOG_CRASH_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn configured() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Whether the named crash point is enabled.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    configured() == Some(name)
}

/// Aborts the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// Defined crash point names
pub mod points {
    /// A new bucket file was created and its directory entry synced
    pub const CSV_AFTER_CREATE: &str = "csv_after_create";
    /// The header row of a bucket was written and synced
    pub const CSV_AFTER_HEADER: &str = "csv_after_header";
    /// A record row was written and synced, before the cursor moved
    pub const CSV_AFTER_RECORD: &str = "csv_after_record";
    /// A row was committed to the trade database, before the cursor moved
    pub const SQLITE_AFTER_INSERT: &str = "sqlite_after_insert";

    pub fn all() -> &'static [&'static str] {
        &[CSV_AFTER_CREATE, CSV_AFTER_HEADER, CSV_AFTER_RECORD, SQLITE_AFTER_INSERT]
    }
}
