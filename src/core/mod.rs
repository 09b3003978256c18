// Core types
pub mod types;
pub use types::*;

pub mod error;
pub use error::{AnalyzerError, ParseError};

// Logging functionality
pub mod logger;

// Pipeline stages, in the order they run
pub mod extractor;
pub mod parser;
pub mod graph;
pub mod severity;
pub mod recommend;
pub mod visualization;

use crate::core::extractor::{EventPayload, extract};
use crate::core::graph::{CycleSearch, DEFAULT_MAX_CYCLE_LENGTH, WaitForGraph, search_cycles};
use crate::core::parser::{DeadlockParser, ParserConfig};
use crate::core::recommend::{PartialAnalysis, recommend};
use crate::core::visualization::{AnalysisMetadata, DeadlockAnalysis, assemble, validate};
use anyhow::Result;
use std::time::Instant;

/// Settings for one analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerConfig {
    pub parser: ParserConfig,
    /// Longest cycle (in processes) the detector enumerates
    pub max_cycle_length: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            parser: ParserConfig::default(),
            max_cycle_length: DEFAULT_MAX_CYCLE_LENGTH,
        }
    }
}

/// Lockscope analyzer configuration and entry point
pub struct Analyzer {
    config: AnalyzerConfig,
    #[cfg(feature = "logging-and-visualization")]
    log_path: Option<String>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Create a new Analyzer with default settings
    ///
    /// By default:
    /// - Logging is disabled
    /// - Blocks without a query line are dropped
    /// - Cycles up to 32 processes long are enumerated
    pub fn new() -> Self {
        Analyzer {
            config: AnalyzerConfig::default(),
            #[cfg(feature = "logging-and-visualization")]
            log_path: None,
        }
    }

    /// Activate the event log and set the path for the log file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Returns
    /// The builder for method chaining
    #[cfg(feature = "logging-and-visualization")]
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Bound the length of enumerated cycles; values below 2 are raised to 2
    ///
    /// A component with no cycle within the bound still reports its shortest
    /// cycle, with a warning in the metadata.
    pub fn max_cycle_length(mut self, max: usize) -> Self {
        self.config.max_cycle_length = max.max(2);
        self
    }

    /// Keep process blocks that have no `Process N: <query>` line
    pub fn lenient_queries(mut self, lenient: bool) -> Self {
        self.config.parser.lenient_queries = lenient;
        self
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self.config.max_cycle_length = self.config.max_cycle_length.max(2);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Initialize the event log, if one was configured
    ///
    /// Analyses work without calling this; it only matters for logging.
    ///
    /// # Errors
    /// Returns an error if logger initialization fails
    pub fn start(self) -> Result<Self> {
        #[cfg(feature = "logging-and-visualization")]
        if let Some(log_path) = &self.log_path {
            use anyhow::Context;
            logger::init_logger(Some(log_path)).context("Failed to initialize logger")?;
        }

        Ok(self)
    }

    /// Analyze an event payload
    ///
    /// # Errors
    /// * [`AnalyzerError::NoDeadlockSignature`] - the payload has no deadlock text
    /// * [`AnalyzerError::Parse`] - the text has no usable process blocks
    /// * [`AnalyzerError::NoCyclesFound`] - the waits do not close a cycle
    /// * [`AnalyzerError::InvariantViolation`] - internal defect
    pub fn analyze(&self, payload: &EventPayload) -> Result<DeadlockAnalysis, AnalyzerError> {
        let Some(text) = extract(payload) else {
            logger::record(Events::AnalysisFailed, None, || {
                AnalyzerError::NoDeadlockSignature.to_string()
            });
            return Err(AnalyzerError::NoDeadlockSignature);
        };
        self.analyze_text(text)
    }

    /// Analyze a deadlock diagnostic directly, skipping payload extraction
    pub fn analyze_text(&self, text: &str) -> Result<DeadlockAnalysis, AnalyzerError> {
        logger::record(Events::AnalysisStarted, None, || {
            format!("{} bytes of diagnostic text", text.len())
        });

        let result = self.run_pipeline(text);
        match &result {
            Ok(analysis) => logger::record(Events::AnalysisCompleted, None, || {
                format!(
                    "{} cycle(s), severity {}",
                    analysis.cycles.len(),
                    analysis.severity
                )
            }),
            Err(err) => logger::record(Events::AnalysisFailed, None, || err.to_string()),
        }
        result
    }

    /// Deserialize a JSON event payload and analyze it
    ///
    /// # Errors
    /// [`AnalyzerError::InvalidPayload`] if the JSON is neither a string nor an
    /// event object, otherwise as [`Analyzer::analyze`]
    pub fn analyze_json(&self, json: &str) -> Result<DeadlockAnalysis, AnalyzerError> {
        let payload = EventPayload::from_json(json)?;
        self.analyze(&payload)
    }

    fn run_pipeline(&self, text: &str) -> Result<DeadlockAnalysis, AnalyzerError> {
        let started = Instant::now();

        let parsed = DeadlockParser::new(self.config.parser.clone()).parse(text)?;
        let graph = WaitForGraph::build(&parsed);
        let CycleSearch {
            mut cycles,
            warnings: search_warnings,
        } = search_cycles(&graph, self.config.max_cycle_length);

        let mut warnings = parsed.warnings;
        warnings.extend(search_warnings);
        for warning in &warnings {
            logger::record(Events::ParseWarning, warning.pid, || warning.to_string());
        }

        if cycles.is_empty() {
            return Err(AnalyzerError::NoCyclesFound);
        }

        for cycle in &mut cycles {
            cycle.severity = severity::score(cycle, &graph);
            logger::record(Events::CycleDetected, None, || {
                format!("{:?} severity {}", cycle.pids, cycle.severity)
            });
        }

        let recommended_fix = recommend(&PartialAnalysis {
            graph: &graph,
            cycles: &cycles,
        });

        let elapsed = started.elapsed().as_micros() as u64;
        let metadata = AnalysisMetadata::new(elapsed, warnings);
        let analysis = assemble(graph, cycles, parsed.processes, recommended_fix, metadata);

        if let Err(violation) = validate(&analysis) {
            debug_assert!(false, "analysis invariant violated: {violation}");
            eprintln!("lockscope: analysis invariant violated: {violation}");
            logger::record(Events::InvariantViolation, None, || violation.clone());
            return Err(AnalyzerError::InvariantViolation(violation));
        }

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "ERROR:  deadlock detected\n\
DETAIL:  Process 12345 waits for ShareLock on relation users; blocked by process 67890.\n\
Process 67890 waits for ShareLock on relation accounts; blocked by process 12345.\n\
Process 12345: UPDATE accounts SET balance = balance - 100 WHERE id = 1;\n\
Process 67890: UPDATE users SET status = 'active' WHERE id = 1;";

    #[test]
    fn test_analyze_text_end_to_end() {
        let analysis = Analyzer::new().analyze_text(SCENARIO).unwrap();
        assert_eq!(analysis.cycles.len(), 1);
        assert_eq!(analysis.cycles[0].pids, vec![12345, 67890]);
        assert_eq!(analysis.severity, 50);
        assert!(analysis.recommended_fix.starts_with("## Deadlock remediation"));
        assert_eq!(analysis.metadata.cycle_count, 1);
    }

    #[test]
    fn test_payload_without_signature() {
        let payload = EventPayload::from("connection reset by peer");
        assert!(matches!(
            Analyzer::new().analyze(&payload),
            Err(AnalyzerError::NoDeadlockSignature)
        ));
    }

    #[test]
    fn test_analyze_json_rejects_wrong_shape() {
        assert!(matches!(
            Analyzer::new().analyze_json("42"),
            Err(AnalyzerError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_lenient_queries_changes_outcome() {
        let text = "Process 1 waits for ShareLock on relation a; blocked by process 2.\n\
Process 2 waits for ShareLock on relation b; blocked by process 1.";

        assert!(matches!(
            Analyzer::new().analyze_text(text),
            Err(AnalyzerError::Parse(ParseError::NoValidProcessBlocks { dropped: 2 }))
        ));

        let analysis = Analyzer::new().lenient_queries(true).analyze_text(text).unwrap();
        assert_eq!(analysis.cycles[0].pids, vec![1, 2]);
    }

    #[test]
    fn test_max_cycle_length_is_floored() {
        let analyzer = Analyzer::new().max_cycle_length(0);
        assert_eq!(analyzer.config().max_cycle_length, 2);
        assert!(analyzer.analyze_text(SCENARIO).is_ok());
    }
}
