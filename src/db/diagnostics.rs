//! Reporting of connection failures.
//!
//! A failed connection produces one multi-line report which is handed to a
//! [`DiagnosticSink`]. Under [`FailurePolicy::Exit`] the process then stops
//! with a short user-facing message.

use chrono::Local;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::DbError;

/// Message shown to the user when the process stops on a connection failure
pub const USER_MESSAGE: &str = "Connection failed. Details have been logged.";

/// Receives formatted diagnostic reports
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, message: &str);
}

/// Appends reports to a log file and emits them through `tracing`
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(message.as_bytes())
    }
}

impl Default for FileSink {
    fn default() -> Self {
        Self::new(default_log_path())
    }
}

impl DiagnosticSink for FileSink {
    fn record(&self, message: &str) {
        tracing::error!("{}", message.trim_end());
        if let Err(e) = self.append(message) {
            tracing::warn!("could not write {}: {}", self.path.display(), e);
        }
    }
}

/// `<local data dir>/polydb/error_log.txt`, or `error_log.txt` when the
/// platform has no data directory
pub fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("polydb").join("error_log.txt"))
        .unwrap_or_else(|| PathBuf::from("error_log.txt"))
}

/// What happens after a connection failure has been reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Print [`USER_MESSAGE`] and exit the process with status 1
    #[default]
    Exit,
    /// Return the connection error to the caller
    Propagate,
}

/// One connection failure, rendered as the multi-line log entry
#[derive(Debug)]
pub struct FailureReport<'a> {
    pub location: &'a str,
    pub driver: &'a str,
    pub function: Option<&'a str>,
    pub error: &'a DbError,
}

impl fmt::Display for FailureReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] Database connection failed",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "Location: {}", self.location)?;
        writeln!(f, "Driver: {}", self.driver)?;
        writeln!(f, "Function: {}", self.function.unwrap_or("unknown"))?;
        writeln!(f, "Error: {}", self.error)
    }
}

/// Sink plus policy, owned by the connection manager
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    policy: FailurePolicy,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticSink>, policy: FailurePolicy) -> Self {
        Self { sink, policy }
    }

    /// Record the failure, then exit or hand the error back
    pub fn connection_failed(&self, report: FailureReport<'_>) -> DbError {
        self.sink.record(&report.to_string());
        match self.policy {
            FailurePolicy::Exit => {
                eprintln!("{}", USER_MESSAGE);
                std::process::exit(1);
            }
            FailurePolicy::Propagate => DbError::Connection(match report.error {
                DbError::Connection(msg) => msg.clone(),
                other => other.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured(Mutex<Vec<String>>);

    impl DiagnosticSink for Captured {
        fn record(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_report_format() {
        let error = DbError::Connection("Access denied for user 'app'".into());
        let report = FailureReport {
            location: "src/db/manager.rs:42",
            driver: "mysql",
            function: Some("select"),
            error: &error,
        }
        .to_string();

        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] Database connection failed"));
        assert_eq!(lines[1], "Location: src/db/manager.rs:42");
        assert_eq!(lines[2], "Driver: mysql");
        assert_eq!(lines[3], "Function: select");
        assert_eq!(lines[4], "Error: Connection failed: Access denied for user 'app'");
    }

    #[test]
    fn test_unknown_function() {
        let error = DbError::Connection("refused".into());
        let report = FailureReport {
            location: "here",
            driver: "redis",
            function: None,
            error: &error,
        };
        assert!(report.to_string().contains("Function: unknown\n"));
    }

    #[test]
    fn test_propagate_policy_records_and_returns() {
        let sink = Arc::new(Captured::default());
        let diagnostics = Diagnostics::new(sink.clone(), FailurePolicy::Propagate);
        let error = DbError::Connection("timeout".into());
        let returned = diagnostics.connection_failed(FailureReport {
            location: "here",
            driver: "pgsql",
            function: Some("insert"),
            error: &error,
        });
        assert!(matches!(returned, DbError::Connection(ref msg) if msg == "timeout"));
        let messages = sink.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Driver: pgsql"));
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("error_log.txt");
        let sink = FileSink::new(&path);
        sink.record("first\n");
        sink.record("second\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
