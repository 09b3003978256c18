use thiserror::Error;

/// Fatal parser outcomes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `Process <pid> waits for` line anywhere in the text
    #[error("no process blocks found in deadlock diagnostic")]
    NoProcessesFound,

    /// Process blocks were present but every one of them was malformed
    #[error("all {dropped} process block(s) in the diagnostic were malformed")]
    NoValidProcessBlocks { dropped: usize },
}

/// Errors returned by the analysis pipeline
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// The payload carries no deadlock diagnostic
    #[error("no deadlock signature found in event payload")]
    NoDeadlockSignature,

    #[error("failed to parse deadlock diagnostic: {0}")]
    Parse(#[from] ParseError),

    /// Parsed fine, but the wait-for graph has no cycle
    #[error("diagnostic parsed but contains no wait cycle")]
    NoCyclesFound,

    #[error("event payload is not a supported shape: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The assembled analysis broke a structural invariant; this is a bug
    #[error("analysis invariant violated: {0}")]
    InvariantViolation(String),
}
