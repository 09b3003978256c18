use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// PostgreSQL backend process identifier
///
/// Uniquely identifies a backend within one deadlock report.
pub type Pid = u32;

/// Table-level lock modes, ordered from weakest to strongest
///
/// The ordering matches PostgreSQL's lock mode numbering, so `Ord` can be
/// used to compare restrictiveness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockMode {
    /// All modes, weakest first
    pub const ALL: [LockMode; 8] = [
        LockMode::AccessShare,
        LockMode::RowShare,
        LockMode::RowExclusive,
        LockMode::ShareUpdateExclusive,
        LockMode::Share,
        LockMode::ShareRowExclusive,
        LockMode::Exclusive,
        LockMode::AccessExclusive,
    ];

    /// Parse a lock mode as it appears in server output
    ///
    /// Accepts `ShareLock`, `Share`, `SHARE`, `share lock` and
    /// `SHARE ROW EXCLUSIVE` style spellings.
    pub fn parse(raw: &str) -> Option<LockMode> {
        let mut key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        if key.len() > 4 && key.ends_with("lock") {
            key.truncate(key.len() - 4);
        }

        match key.as_str() {
            "accessshare" => Some(LockMode::AccessShare),
            "rowshare" => Some(LockMode::RowShare),
            "rowexclusive" => Some(LockMode::RowExclusive),
            "shareupdateexclusive" => Some(LockMode::ShareUpdateExclusive),
            "share" => Some(LockMode::Share),
            "sharerowexclusive" => Some(LockMode::ShareRowExclusive),
            "exclusive" => Some(LockMode::Exclusive),
            "accessexclusive" => Some(LockMode::AccessExclusive),
            _ => None,
        }
    }

    /// Name as PostgreSQL prints it, e.g. `ShareRowExclusiveLock`
    pub fn pg_name(self) -> &'static str {
        match self {
            LockMode::AccessShare => "AccessShareLock",
            LockMode::RowShare => "RowShareLock",
            LockMode::RowExclusive => "RowExclusiveLock",
            LockMode::ShareUpdateExclusive => "ShareUpdateExclusiveLock",
            LockMode::Share => "ShareLock",
            LockMode::ShareRowExclusive => "ShareRowExclusiveLock",
            LockMode::Exclusive => "ExclusiveLock",
            LockMode::AccessExclusive => "AccessExclusiveLock",
        }
    }

    /// Whether two table-level modes conflict
    ///
    /// Follows the conflict table in the PostgreSQL manual (13.3.1).
    pub fn conflicts_with(self, other: LockMode) -> bool {
        use LockMode::*;
        let conflicting: &[LockMode] = match self {
            AccessShare => &[AccessExclusive],
            RowShare => &[Exclusive, AccessExclusive],
            RowExclusive => &[Share, ShareRowExclusive, Exclusive, AccessExclusive],
            ShareUpdateExclusive => &[
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            Share => &[
                RowExclusive,
                ShareUpdateExclusive,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            ShareRowExclusive => &[
                RowExclusive,
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            Exclusive => &[
                RowShare,
                RowExclusive,
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            AccessExclusive => &LockMode::ALL,
        };
        conflicting.contains(&other)
    }

    /// The weakest mode that conflicts with `self`
    ///
    /// Used to infer what a blocker must at least be holding when the report
    /// only tells us what the waiter asked for.
    pub fn minimal_conflicting(self) -> LockMode {
        LockMode::ALL
            .into_iter()
            .find(|&candidate| self.conflicts_with(candidate))
            .unwrap_or(LockMode::AccessExclusive)
    }

    /// Modes that block ordinary reads and writes on the whole table
    pub fn is_table_exclusive(self) -> bool {
        matches!(self, LockMode::Exclusive | LockMode::AccessExclusive)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_name())
    }
}

/// Kind of lockable object named in a `waits for ... on <object>` clause
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Relation,
    Tuple,
    Page,
    Extend,
    Transaction,
    VirtualTransaction,
    Object,
    Advisory,
    Other,
}

impl ResourceKind {
    /// Row-level resources: contention on individual rows, not whole tables
    pub fn is_row_level(self) -> bool {
        matches!(self, ResourceKind::Transaction | ResourceKind::Tuple)
    }
}

/// A lock held or awaited by a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LockRef {
    /// Table/index name, or a descriptive name for non-relation objects
    /// such as `transaction 1104`
    pub relation: String,
    pub mode: LockMode,
    pub granted: bool,
    pub resource: ResourceKind,
}

impl LockRef {
    pub fn describe(&self) -> String {
        match self.resource {
            ResourceKind::Relation => format!("{} on relation {}", self.mode, self.relation),
            _ => format!("{} on {}", self.mode, self.relation),
        }
    }
}

/// Everything the report tells us about one backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: Pid,
    /// Statement the backend was executing; `None` for a backend that only
    /// appears as somebody's blocker
    pub query: Option<String>,
    pub application_name: Option<String>,
    pub username: Option<String>,
    pub tables_accessed: BTreeSet<String>,
    pub locks_held: Vec<LockRef>,
    pub locks_waiting: Vec<LockRef>,
    /// Blockers in the order the report names them
    pub blocked_by: Vec<Pid>,
}

/// One `Process N waits for ...; blocked by process M.` relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitRelation {
    pub waiter: Pid,
    /// `None` when the line names no blocker
    pub blocker: Option<Pid>,
    pub lock: LockRef,
}

/// A non-fatal problem found while parsing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParseWarning {
    /// 1-based line number in the normalised diagnostic, 0 for warnings
    /// about the report as a whole
    pub line: usize,
    pub pid: Option<Pid>,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.pid) {
            (0, Some(pid)) => write!(f, "process {}: {}", pid, self.message),
            (0, None) => f.write_str(&self.message),
            (line, Some(pid)) => write!(f, "line {} (process {}): {}", line, pid, self.message),
            (line, None) => write!(f, "line {}: {}", line, self.message),
        }
    }
}

/// Kinds of events recorded in the analysis event log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Events {
    /// An analysis request entered the pipeline
    AnalysisStarted,
    /// A process block was skipped or the cycle search was cut short
    ParseWarning,
    /// A wait cycle was found
    CycleDetected,
    /// The pipeline produced a `DeadlockAnalysis`
    AnalysisCompleted,
    /// The pipeline returned an error
    AnalysisFailed,
    /// The assembled output broke a structural invariant
    InvariantViolation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mode_spellings() {
        assert_eq!(LockMode::parse("ShareLock"), Some(LockMode::Share));
        assert_eq!(LockMode::parse("SHARE"), Some(LockMode::Share));
        assert_eq!(
            LockMode::parse("SHARE ROW EXCLUSIVE"),
            Some(LockMode::ShareRowExclusive)
        );
        assert_eq!(
            LockMode::parse("access exclusive lock"),
            Some(LockMode::AccessExclusive)
        );
        assert_eq!(LockMode::parse("RowExclusiveLock"), Some(LockMode::RowExclusive));
        assert_eq!(LockMode::parse("SpinLock"), None);
    }

    #[test]
    fn test_conflict_table_is_symmetric() {
        for a in LockMode::ALL {
            for b in LockMode::ALL {
                assert_eq!(
                    a.conflicts_with(b),
                    b.conflicts_with(a),
                    "{a} vs {b} should be symmetric"
                );
            }
        }
    }

    #[test]
    fn test_minimal_conflicting_mode() {
        assert_eq!(LockMode::Share.minimal_conflicting(), LockMode::RowExclusive);
        assert_eq!(LockMode::AccessShare.minimal_conflicting(), LockMode::AccessExclusive);
        assert_eq!(LockMode::RowShare.minimal_conflicting(), LockMode::Exclusive);
        assert_eq!(LockMode::AccessExclusive.minimal_conflicting(), LockMode::AccessShare);
    }
}
