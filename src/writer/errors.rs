//! Persistence error types
//!
//! Error codes:
//! - TRADELOG_SETUP_FAILED (FATAL severity)
//! - TRADELOG_APPEND_FAILED (ERROR severity)
//! - TRADELOG_FSYNC_FAILED (ERROR severity)
//! - TRADELOG_PERMISSION_DENIED (ERROR severity)
//! - TRADELOG_WORKER_PANICKED (ERROR severity)
//!
//! ERROR-severity failures are transient from the engine's point of view: the
//! batch is retried. A FATAL failure disables the engine.

use std::error::Error as _;
use std::fmt;
use std::io;
use std::path::Path;

/// Severity levels for persistence errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The attempt failed; it will be retried
    Error,
    /// The backend is unusable; the engine is disabled
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Persistence error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistErrorCode {
    /// Backend setup failed
    SetupFailed,
    /// Writing a record (or header) failed
    AppendFailed,
    /// Flushing a write to stable storage failed
    FsyncFailed,
    /// Missing permission on a bucket or its folder
    PermissionDenied,
    /// The writer panicked during an attempt
    WorkerPanicked,
}

impl PersistErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            PersistErrorCode::SetupFailed => "TRADELOG_SETUP_FAILED",
            PersistErrorCode::AppendFailed => "TRADELOG_APPEND_FAILED",
            PersistErrorCode::FsyncFailed => "TRADELOG_FSYNC_FAILED",
            PersistErrorCode::PermissionDenied => "TRADELOG_PERMISSION_DENIED",
            PersistErrorCode::WorkerPanicked => "TRADELOG_WORKER_PANICKED",
        }
    }

    /// Returns the severity level for this code
    pub fn severity(&self) -> Severity {
        match self {
            PersistErrorCode::SetupFailed => Severity::Fatal,
            PersistErrorCode::AppendFailed
            | PersistErrorCode::FsyncFailed
            | PersistErrorCode::PermissionDenied
            | PersistErrorCode::WorkerPanicked => Severity::Error,
        }
    }
}

impl fmt::Display for PersistErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Persistence error with context
#[derive(Debug)]
pub struct PersistError {
    code: PersistErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl PersistError {
    /// Create a setup failed error
    pub fn setup_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(PersistErrorCode::SetupFailed, message, source)
    }

    /// Create an append failed error
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(PersistErrorCode::AppendFailed, message, source)
    }

    /// Create an fsync failed error
    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::with_source(PersistErrorCode::FsyncFailed, message, source)
    }

    /// Create a permission denied error for the given path
    pub fn permission_denied(message: impl Into<String>, path: &Path) -> Self {
        Self {
            code: PersistErrorCode::PermissionDenied,
            message: message.into(),
            details: Some(format!("path: {}", path.display())),
            source: None,
        }
    }

    /// Create an error for a writer that panicked
    pub fn worker_panicked(message: impl Into<String>) -> Self {
        Self {
            code: PersistErrorCode::WorkerPanicked,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    fn with_source(code: PersistErrorCode, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Attach details about the error context
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> PersistErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error disables the engine
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Compact one-line description: code, message and the innermost cause.
    pub fn summary(&self) -> String {
        match &self.source {
            Some(source) => format!("{}: {}: {}", self.code, self.message, source),
            None => format!("{}: {}", self.code, self.message),
        }
    }

    /// Full description including details and the whole cause chain.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            report.push_str("\n  caused by: ");
            report.push_str(&err.to_string());
            cause = err.source();
        }
        report
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for persistence operations
pub type PersistResult<T> = Result<T, PersistError>;
