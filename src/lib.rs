//! # Lockscope
//!
//! A PostgreSQL deadlock analyzer with visualization support.
//!
//! Lockscope takes the diagnostic PostgreSQL emits when it aborts a
//! transaction with `deadlock detected`, rebuilds the wait-for graph between
//! the backends involved, finds every wait cycle and explains how to break it.
//!
//! ## Features
//!
//! - Parsing of client-side messages and server logs, prefixes included
//! - Wait-for graph with process and table nodes
//! - Tarjan SCC and bounded elementary-cycle enumeration
//! - Heuristic severity score and Markdown remediation advice
//! - Graph-ready JSON output and a compressed URL hand-off to a web viewer
//! - Optional JSON-lines event log (`logging-and-visualization` feature)
//!
//! ## Example
//!
//! ```
//! use lockscope::{EventPayload, analyze_deadlock};
//!
//! let report = "ERROR:  deadlock detected
//! DETAIL:  Process 12345 waits for ShareLock on relation users; blocked by process 67890.
//! Process 67890 waits for ShareLock on relation accounts; blocked by process 12345.
//! Process 12345: UPDATE accounts SET balance = balance - 100 WHERE id = 1;
//! Process 67890: UPDATE users SET status = 'active' WHERE id = 1;";
//!
//! let analysis = analyze_deadlock(&EventPayload::from(report)).unwrap();
//! assert_eq!(analysis.cycles[0].pids, vec![12345, 67890]);
//! assert!(analysis.severity >= 40);
//! ```

mod core;
pub use core::{
    Analyzer, AnalyzerConfig, AnalyzerError, ParseError,
    extractor::{
        EventEntry, EventPayload, ExceptionInterface, ExceptionValue, LogEntryInterface,
        StructuredEvent, extract, has_deadlock_signature,
    },
    graph::{
        Cycle, CycleSearch, DEFAULT_MAX_CYCLE_LENGTH, EdgeKind, GraphEdge, GraphNode,
        MAX_CYCLES_PER_COMPONENT, MAX_SEARCH_STEPS_PER_COMPONENT, ProcessNode, TableNode,
        WaitForGraph, find_cycles, search_cycles, tarjan_scc,
    },
    parser::{DeadlockParser, ParsedDeadlock, ParserConfig, parse},
    recommend::{CycleFacts, CycleWait, PartialAnalysis, Rule, default_rules, recommend, recommend_with},
    severity::{is_multi_table_dml, score},
    types::{Events, LockMode, LockRef, ParseWarning, Pid, ProcessRecord, ResourceKind, WaitRelation},
    visualization::{AnalysisMetadata, DeadlockAnalysis, LockEntry, PARSER_VERSION},
};

#[cfg(feature = "logging-and-visualization")]
pub use core::logger::{EventLogger, LogEntry, flush_logger, get_current_log_file};

pub mod showcase;
pub use showcase::{showcase, showcase_url};

/// Analyze an event payload with the default settings
///
/// Shorthand for `Analyzer::new().analyze(payload)`.
///
/// # Errors
/// See [`Analyzer::analyze`]
pub fn analyze_deadlock(payload: &EventPayload) -> Result<DeadlockAnalysis, AnalyzerError> {
    Analyzer::new().analyze(payload)
}
