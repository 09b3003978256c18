//! Logging functionality for Lockscope
//!
//! With the `logging-and-visualization` feature the pipeline records its
//! progress in a JSON-lines event log. Without it, [`record`] compiles to a
//! no-op and no background thread is ever started.

#[cfg(feature = "logging-and-visualization")]
mod event_logger;

#[cfg(feature = "logging-and-visualization")]
pub use event_logger::{
    EventLogger, LogEntry, flush_logger, get_current_log_file, init_logger, is_logging_enabled,
    log_event,
};

use crate::core::types::{Events, Pid};

/// Record an analysis event in the global event log, if one is active
#[cfg(feature = "logging-and-visualization")]
#[inline]
pub fn record(event: Events, pid: Option<Pid>, detail: impl FnOnce() -> String) {
    if is_logging_enabled() {
        log_event(event, pid, &detail());
    }
}

#[cfg(not(feature = "logging-and-visualization"))]
#[inline(always)]
pub fn record(_event: Events, _pid: Option<Pid>, _detail: impl FnOnce() -> String) {}
