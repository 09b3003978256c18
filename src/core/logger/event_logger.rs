//! Logger for recording analysis events
//!
//! This module writes one JSON object per line for every notable step of an
//! analysis: request start, skipped process blocks, detected cycles, the final
//! outcome and invariant violations. Writes happen on a background thread fed
//! by a channel, so logging never slows the analysis down. The log can be
//! flushed explicitly before it is read back.

use crate::core::types::{Events, Pid};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Structure for a single log entry
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogEntry {
    /// Type of event that occurred
    pub event: Events,
    /// Backend the event is about, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pid: Option<Pid>,
    /// Human-readable detail
    pub detail: String,
    /// Absolute timestamp of when the event occurred (seconds since Unix Epoch)
    pub timestamp: f64,
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
pub enum LoggerCommand {
    /// Write a log entry to the file
    LogEntry(LogEntry),
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger for recording analysis events
///
/// The EventLogger hands entries to a background writer thread, keeping file
/// I/O off the analysis path.
pub struct EventLogger {
    /// Channel sender for async communication with logger thread
    sender: Sender<LoggerCommand>,
    /// Flag indicating if a flush operation is in progress
    flushing: Arc<AtomicBool>,
    /// Resolved path of the log file
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        // Make sure nothing is lost if the program exits right after an analysis
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a new logger that writes to the specified file asynchronously
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the filename contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if the directory containing the log file could not be
    /// created or the log file could not be opened for writing
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_path = resolve_log_path(path.as_ref());

        if let Some(parent) = file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).context("Failed to create log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)
            .context("Failed to open log file")?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        let flushing = Arc::new(AtomicBool::new(false));
        let flushing_clone = Arc::clone(&flushing);

        thread::Builder::new()
            .name("lockscope-logger".to_string())
            .spawn(move || async_logger_thread(file, rx, flushing_clone))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger {
            sender: tx,
            flushing,
            path: file_path,
        })
    }

    /// Path of the file this logger writes to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an event for writing
    ///
    /// Non-blocking; a closed channel is reported on stderr and otherwise ignored.
    pub fn log_event(&self, event: Events, pid: Option<Pid>, detail: &str) {
        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;

        let entry = LogEntry {
            event,
            pid,
            detail: detail.to_string(),
            timestamp,
        };

        if let Err(e) = self.sender.send(LoggerCommand::LogEntry(entry)) {
            eprintln!("Failed to send log entry: {e:?}");
        }
    }

    /// Force flush all pending log entries to disk
    ///
    /// Blocks until the writer thread confirms the flush.
    ///
    /// # Errors
    /// Returns an error if the flush request could not be sent or was not
    /// confirmed in time
    pub fn flush(&self) -> Result<()> {
        let already_flushing = self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();

        if already_flushing {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .context("Logger thread is gone")?;

            flush_rx
                .recv_timeout(Duration::from_secs(10))
                .map_err(|_| anyhow::anyhow!("Flush operation timed out"))
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

/// Substitute the `{timestamp}` placeholder, if present
fn resolve_log_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    #[allow(clippy::literal_string_with_formatting_args)]
    if raw.contains("{timestamp}") {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(raw.replace("{timestamp}", &timestamp))
    } else {
        path.to_path_buf()
    }
}

/// Writer thread: serializes each entry and writes it as one line
fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>, flushing: Arc<AtomicBool>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::LogEntry(entry) => {
                if let Ok(json) = serde_json::to_string(&entry)
                    && let Err(e) = writeln!(writer, "{json}").and_then(|_| writer.flush())
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                flushing.store(true, Ordering::Release);
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                flushing.store(false, Ordering::Release);
                let _ = responder.send(());
            }
        }
    }

    // Channel closed - perform final flush before thread exits
    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}

// Global logger instance
lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<Option<EventLogger>> = Mutex::new(None);
}

/// Set the global logger to use the specified file, or disable logging if None
///
/// # Errors
/// Returns an error if the log file cannot be created
pub fn init_logger<P: AsRef<Path>>(path: Option<P>) -> Result<()> {
    let logger = match path {
        Some(path) => Some(EventLogger::with_file(path).context("Failed to create logger with file")?),
        None => None,
    };
    *GLOBAL_LOGGER.lock() = logger;
    Ok(())
}

/// Log an event to the global logger (if enabled)
pub fn log_event(event: Events, pid: Option<Pid>, detail: &str) {
    if let Some(logger) = GLOBAL_LOGGER.lock().as_ref() {
        logger.log_event(event, pid, detail);
    }
}

/// Flush the global logger (if enabled)
///
/// # Errors
/// Returns an error if the pending entries could not be written
pub fn flush_logger() -> Result<()> {
    match GLOBAL_LOGGER.lock().as_ref() {
        Some(logger) => logger.flush(),
        None => Ok(()),
    }
}

/// Check if the global logger is enabled
pub fn is_logging_enabled() -> bool {
    GLOBAL_LOGGER.lock().is_some()
}

/// Get current log file path
pub fn get_current_log_file() -> Option<PathBuf> {
    GLOBAL_LOGGER
        .lock()
        .as_ref()
        .map(|logger| logger.path().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_entries(path: &Path) -> Vec<LogEntry> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_basic_logging() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("basic.log");

        let logger = EventLogger::with_file(&log_path).unwrap();
        logger.log_event(Events::AnalysisStarted, None, "1024 bytes");
        logger.log_event(Events::ParseWarning, Some(7), "line 3: unknown lock mode");
        logger.log_event(Events::CycleDetected, None, "[7, 9]");
        logger.log_event(Events::AnalysisCompleted, None, "severity 50");
        logger.flush().unwrap();

        let entries = read_entries(&log_path);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].event, Events::AnalysisStarted);
        assert_eq!(entries[0].pid, None);
        assert_eq!(entries[1].pid, Some(7));
        assert!(entries[3].timestamp > 0.0);
    }

    #[test]
    fn test_flush_idempotence() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("flush_test.log");

        let logger = EventLogger::with_file(&log_path).unwrap();
        for i in 0..10 {
            logger.log_event(Events::CycleDetected, Some(i), "cycle");
        }

        logger.flush().unwrap();
        logger.flush().unwrap();
        logger.flush().unwrap();

        assert_eq!(read_entries(&log_path).len(), 10);
    }

    #[test]
    fn test_timestamp_placeholder_and_nested_directory() {
        let temp_dir = TempDir::new().unwrap();
        let pattern = temp_dir.path().join("nested/run_{timestamp}.log");

        let logger = EventLogger::with_file(&pattern).unwrap();
        let resolved = logger.path().to_path_buf();
        assert!(!resolved.to_string_lossy().contains("{timestamp}"));
        assert!(resolved.starts_with(temp_dir.path().join("nested")));

        logger.log_event(Events::AnalysisFailed, None, "no cycles");
        logger.flush().unwrap();
        assert_eq!(read_entries(&resolved)[0].event, Events::AnalysisFailed);
    }

    #[test]
    fn test_logger_drop_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("drop_test.log");

        {
            let logger = EventLogger::with_file(&log_path).unwrap();
            logger.log_event(Events::InvariantViolation, Some(1), "dangling edge");
        }

        // Give the async thread a moment to finish
        std::thread::sleep(Duration::from_millis(100));

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("\"event\":\"InvariantViolation\""));
    }
}
