/// Structured logging for the smoke early-warning service
///
/// Every record carries a UTC timestamp, a severity, the subsystem it
/// came from and, when relevant, the city or station it concerns.
/// Records go to stderr (stdout carries CLI output) and can also be
/// appended to a file for unattended runs.
///
/// Nothing is printed until `init_logger` or `init_from_config` runs,
/// so library users and unit tests stay quiet by default.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::config::LoggingConfig;
use crate::model::FetchError;

// ---------------------------------------------------------------------------
// Severity and source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parses a config value; unknown names fall back to `Info`.
    pub fn parse(raw: &str) -> LogLevel {
        match raw.trim().to_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Subsystem a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Waqi,
    Catalog,
    Cache,
    Store,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataSource::Waqi => "WAQI",
            DataSource::Catalog => "CATALOG",
            DataSource::Cache => "CACHE",
            DataSource::Store => "STORE",
            DataSource::System => "SYS",
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One log line before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord<'a> {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub source: DataSource,
    pub id: Option<&'a str>,
    pub message: &'a str,
}

impl fmt::Display for LogRecord<'_> {
    /// `2024-06-05 12:00:00 UTC WARN CACHE [Toronto]: message`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.level,
            self.source
        )?;
        if let Some(id) = self.id {
            write!(f, " [{}]", id)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl LogRecord<'_> {
    /// Short console form used when timestamps are turned off.
    fn compact(&self) -> String {
        let id = self.id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        match self.level {
            LogLevel::Error => format!("   ✗ {}{}: {}", self.source, id, self.message),
            LogLevel::Warning => format!("   ⚠ {}{}: {}", self.source, id, self.message),
            LogLevel::Info => format!("   {}{}: {}", self.source, id, self.message),
            LogLevel::Debug => format!("   [DEBUG] {}{}: {}", self.source, id, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Global logger
// ---------------------------------------------------------------------------

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

struct Logger {
    min_level: LogLevel,
    timestamps: bool,
    /// Opened once at init; `None` when file logging is off or failed.
    file: Option<File>,
}

impl Logger {
    fn write(&mut self, record: &LogRecord<'_>) {
        if record.level < self.min_level {
            return;
        }

        let line = record.to_string();
        if self.timestamps {
            eprintln!("{}", line);
        } else {
            eprintln!("{}", record.compact());
        }

        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                eprintln!("log file write failed, disabling file output: {}", e);
                self.file = None;
            }
        }
    }
}

/// Installs the global logger, replacing any previous one.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("cannot open log file {}: {}", path, e))
            .ok()
    });

    *LOGGER.lock().unwrap_or_else(PoisonError::into_inner) = Some(Logger {
        min_level,
        timestamps: console_timestamps,
        file,
    });
}

/// `init_logger` driven by the `[logging]` config section.
pub fn init_from_config(config: &LoggingConfig) {
    init_logger(
        LogLevel::parse(&config.level),
        config.file.as_deref(),
        config.timestamps,
    );
}

fn emit(level: LogLevel, source: DataSource, id: Option<&str>, message: &str) {
    let mut guard = LOGGER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(logger) = guard.as_mut() {
        logger.write(&LogRecord {
            at: Utc::now(),
            level,
            source,
            id,
            message,
        });
    }
}

pub fn info(source: DataSource, id: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, id, message);
}

pub fn warn(source: DataSource, id: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, id, message);
}

pub fn error(source: DataSource, id: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, id, message);
}

pub fn debug(source: DataSource, id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, id, message);
}

// ---------------------------------------------------------------------------
// Fetch failures and refresh summaries
// ---------------------------------------------------------------------------

/// Whether a live-source failure is worth an operator's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Deployments without a WAQI token run demo-only on purpose.
    Expected,
    /// Outage, timeout, bad token or a changed response format.
    Unexpected,
    /// Connection-level failure on either side of the link.
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureType::Expected => "EXPECTED",
            FailureType::Unexpected => "UNEXPECTED",
            FailureType::Unknown => "UNKNOWN",
        })
    }
}

/// Classifies a live-source failure by its kind.
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        FetchError::NotConfigured => FailureType::Expected,
        FetchError::Timeout
        | FetchError::HttpError(_)
        | FetchError::ParseError(_)
        | FetchError::ApiError(_) => FailureType::Unexpected,
        FetchError::Transport(_) => FailureType::Unknown,
    }
}

/// Logs a fetch failure for `city` at a level matching its classification.
pub fn log_fetch_failure(city: &str, operation: &str, err: &FetchError) {
    let kind = classify_fetch_failure(err);
    let message = format!("{} failed [{}]: {}", operation, kind, err);

    let level = match kind {
        FailureType::Expected => LogLevel::Debug,
        FailureType::Unexpected => LogLevel::Error,
        FailureType::Unknown => LogLevel::Warning,
    };
    emit(level, DataSource::Waqi, Some(city), &message);
}

/// Logs how many cities of a multi-city request produced a result.
pub fn log_refresh_summary(total: usize, successful: usize, failed: usize) {
    let level = match (successful, failed) {
        (_, 0) => LogLevel::Info,
        (0, _) => LogLevel::Error,
        _ => LogLevel::Warning,
    };
    emit(
        level,
        DataSource::System,
        None,
        &format!("{}/{} cities evaluated, {} failed", successful, total, failed),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warn"), LogLevel::Warning);
        assert_eq!(LogLevel::parse(" error "), LogLevel::Error);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Info);
    }

    #[test]
    fn test_record_line_format() {
        let record = LogRecord {
            at: Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap(),
            level: LogLevel::Warning,
            source: DataSource::Cache,
            id: Some("Toronto"),
            message: "refresh failed",
        };
        assert_eq!(
            record.to_string(),
            "2024-06-05 12:00:00 UTC WARN CACHE [Toronto]: refresh failed"
        );

        let bare = LogRecord { id: None, ..record };
        assert!(bare.to_string().ends_with("WARN CACHE: refresh failed"));
    }

    #[test]
    fn test_fetch_failures_are_classified() {
        let cases = [
            (FetchError::NotConfigured, FailureType::Expected),
            (FetchError::HttpError(500), FailureType::Unexpected),
            (FetchError::Timeout, FailureType::Unexpected),
            (FetchError::ParseError("eof".into()), FailureType::Unexpected),
            (FetchError::ApiError("Invalid key".into()), FailureType::Unexpected),
            (FetchError::Transport("reset".into()), FailureType::Unknown),
        ];
        for (err, expected) in cases {
            assert_eq!(classify_fetch_failure(&err), expected, "{}", err);
        }
    }

    #[test]
    fn test_classification_ignores_message_text() {
        // A transport message that happens to mention a timeout.
        let err = FetchError::Transport("timeout waiting for header".into());
        assert_eq!(classify_fetch_failure(&err), FailureType::Unknown);
        let err = FetchError::ApiError("No WAQI API token".into());
        assert_eq!(classify_fetch_failure(&err), FailureType::Unexpected);
    }
}
