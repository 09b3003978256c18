//! Parser for PostgreSQL deadlock diagnostics
//!
//! The server reports a deadlock as a headline, one `waits for` line per
//! blocked backend, the statement each backend was running, and a hint:
//!
//! ```text
//! ERROR:  deadlock detected
//! DETAIL:  Process 16121 waits for ShareLock on transaction 1104; blocked by process 16143.
//!         Process 16143 waits for ShareLock on transaction 1103; blocked by process 16121.
//!         Process 16121: UPDATE accounts SET balance = balance - 10 WHERE id = 1;
//!         Process 16143: UPDATE accounts SET balance = balance + 10 WHERE id = 2;
//! HINT:  See server log for query details.
//! ```
//!
//! Server logs add a `log_line_prefix` in front of every tag, aggregators
//! sometimes flatten the whole report onto a single line, and statements can
//! span several lines. The parser copes with all three.
//!
//! Blocks that cannot be understood are dropped and reported as
//! [`ParseWarning`]s instead of failing the whole parse.

use crate::core::error::ParseError;
use crate::core::types::{LockMode, LockRef, ParseWarning, Pid, ProcessRecord, ResourceKind, WaitRelation};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

lazy_static::lazy_static! {
    /// Any `Process N waits for` or `Process N:` occurrence; used to split flattened lines
    static ref ANCHOR: Regex = Regex::new(r"Process\s+\d+(?:\s+waits\s+for\b|:)").unwrap();
    static ref WAITS_ANCHOR: Regex = Regex::new(r"^Process\s+(\S+)\s+waits\s+for\b").unwrap();
    static ref WAITS_LINE: Regex = Regex::new(
        r"^Process\s+(?P<pid>\d+)\s+waits\s+for\s+(?P<mode>.+?)\s+on\s+(?P<target>.+?)(?:;\s*blocked\s+by\s+(?P<blockers>.+?))?\.?\s*$"
    ).unwrap();
    static ref QUERY_LINE: Regex = Regex::new(r"^Process\s+(?P<pid>\d+):\s?(?P<query>.*)$").unwrap();
    static ref TAGGED_LINE: Regex = Regex::new(
        r"^(?P<prefix>.*?)\b(?P<tag>DETAIL|HINT|CONTEXT|STATEMENT|QUERY|LOCATION|ERROR|FATAL|PANIC|WARNING|NOTICE|LOG|INFO|DEBUG[1-5]?):\s*(?P<rest>.*)$"
    ).unwrap();
    static ref TRAILING_SECTION: Regex = Regex::new(r"\s(?:HINT|CONTEXT|STATEMENT|LOCATION):").unwrap();
    static ref DIGITS: Regex = Regex::new(r"\d+").unwrap();

    static ref PREFIX_PID: Regex = Regex::new(r"\[(\d+)\]").unwrap();
    static ref PREFIX_USER: Regex = Regex::new(r"(?:\buser=([^,\s]+))|(?:\]\s*(?:\S+\s+)?([A-Za-z_][\w$-]*)@[A-Za-z_][\w$-]*)").unwrap();
    static ref PREFIX_APP: Regex = Regex::new(r"\b(?:app|application_name)=([^,\s]+)").unwrap();

    static ref RELATION_TARGET: Regex = Regex::new(r"^relation\s+(?P<name>.+?)(?:\s+of\s+database\s+\d+)?$").unwrap();
    static ref TUPLE_TARGET: Regex = Regex::new(r"^tuple\s+\(\d+,\s*\d+\)\s+of\s+relation\s+(?P<name>.+?)(?:\s+of\s+database\s+\d+)?$").unwrap();
    static ref PAGE_TARGET: Regex = Regex::new(r"^page\s+\d+\s+of\s+relation\s+(?P<name>.+?)(?:\s+of\s+database\s+\d+)?$").unwrap();
    static ref EXTEND_TARGET: Regex = Regex::new(r"^extension\s+of\s+relation\s+(?P<name>.+?)(?:\s+of\s+database\s+\d+)?$").unwrap();
    static ref TRANSACTION_TARGET: Regex = Regex::new(r"^transaction\s+(?P<xid>\d+)$").unwrap();
    static ref VIRTUAL_TARGET: Regex = Regex::new(r"^virtual\s+transaction\s+(?P<vxid>\S+)$").unwrap();
}

/// Parser behaviour switches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserConfig {
    /// Keep blocks whose `Process N: <query>` line is missing instead of
    /// dropping them. Client-side error messages never carry query lines.
    pub lenient_queries: bool,
}

/// Result of a successful parse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDeadlock {
    /// Every backend mentioned, keyed by pid
    pub processes: BTreeMap<Pid, ProcessRecord>,
    /// Wait relationships in report order
    pub waits: Vec<WaitRelation>,
    pub warnings: Vec<ParseWarning>,
}

/// One successfully parsed `waits for` line
#[derive(Debug, Clone)]
struct WaitLine {
    line: usize,
    pid: Pid,
    lock: LockRef,
    blockers: Vec<Pid>,
}

/// Metadata pulled out of a `log_line_prefix`
#[derive(Debug, Default)]
struct PrefixInfo {
    username: Option<String>,
    application_name: Option<String>,
}

/// Line-oriented scanner state
#[derive(Default)]
struct Scanner {
    anchors: usize,
    dropped: usize,
    wait_lines: Vec<WaitLine>,
    queries: BTreeMap<Pid, String>,
    prefixes: BTreeMap<Pid, PrefixInfo>,
    /// pid whose statement is currently being collected
    capturing: Option<Pid>,
    warnings: Vec<ParseWarning>,
}

/// Parser for deadlock diagnostics
#[derive(Debug, Clone, Default)]
pub struct DeadlockParser {
    config: ParserConfig,
}

impl DeadlockParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse a diagnostic into process records and wait relationships
    ///
    /// # Errors
    /// * [`ParseError::NoProcessesFound`] - the text contains no
    ///   `Process N waits for` line at all
    /// * [`ParseError::NoValidProcessBlocks`] - every such line was malformed
    pub fn parse(&self, text: &str) -> Result<ParsedDeadlock, ParseError> {
        let mut scanner = Scanner::default();

        for (index, raw) in text.lines().enumerate() {
            scanner.scan_line(index + 1, raw);
        }

        if scanner.anchors == 0 {
            return Err(ParseError::NoProcessesFound);
        }

        let valid = self.select_blocks(&mut scanner);
        if valid.is_empty() {
            return Err(ParseError::NoValidProcessBlocks {
                dropped: scanner.dropped,
            });
        }

        Ok(assemble_records(valid, scanner))
    }

    /// Apply the missing-query policy to the collected `waits for` lines
    fn select_blocks(&self, scanner: &mut Scanner) -> Vec<WaitLine> {
        let mut valid = Vec::with_capacity(scanner.wait_lines.len());
        let mut reported: BTreeSet<Pid> = BTreeSet::new();

        for wait in std::mem::take(&mut scanner.wait_lines) {
            if !scanner.queries.contains_key(&wait.pid) && !self.config.lenient_queries {
                if reported.insert(wait.pid) {
                    scanner.warnings.push(ParseWarning {
                        line: wait.line,
                        pid: Some(wait.pid),
                        message: "no query line for process; block dropped".to_string(),
                    });
                }
                scanner.dropped += 1;
                continue;
            }
            valid.push(wait);
        }

        valid
    }
}

/// Parse with the default configuration
pub fn parse(text: &str) -> Result<ParsedDeadlock, ParseError> {
    DeadlockParser::default().parse(text)
}

impl Scanner {
    fn scan_line(&mut self, line: usize, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }

        // Lines that start with an anchor are report body even if the query
        // text happens to contain something that looks like a tag.
        let body = if starts_with_anchor(trimmed) {
            trimmed
        } else if let Some(caps) = TAGGED_LINE.captures(trimmed) {
            self.record_prefix(caps.name("prefix").map_or("", |m| m.as_str()));

            // A new tagged section ends any statement being collected
            self.capturing = None;
            match detail_section(&caps) {
                Some(detail) => detail,
                None => return,
            }
        } else {
            trimmed
        };

        for segment in split_at_anchors(body) {
            self.scan_segment(line, segment);
        }
    }

    fn scan_segment(&mut self, line: usize, segment: &str) {
        if let Some(anchor) = WAITS_ANCHOR.captures(segment) {
            self.anchors += 1;
            self.capturing = None;
            self.scan_waits(line, segment, &anchor[1]);
        } else if let Some(caps) = QUERY_LINE.captures(segment) {
            self.scan_query(line, &caps["pid"], caps["query"].trim_end());
        } else if let Some(pid) = self.capturing {
            // Continuation of a multi-line statement
            if let Some(query) = self.queries.get_mut(&pid) {
                if !query.is_empty() {
                    query.push('\n');
                }
                query.push_str(segment);
            }
        }
    }

    fn scan_waits(&mut self, line: usize, segment: &str, raw_pid: &str) {
        let Ok(pid) = raw_pid.parse::<Pid>() else {
            self.drop_block(line, None, format!("invalid process id '{raw_pid}'"));
            return;
        };

        let Some(caps) = WAITS_LINE.captures(segment) else {
            self.drop_block(line, Some(pid), "unrecognised waits-for clause".to_string());
            return;
        };

        let raw_mode = &caps["mode"];
        let Some(mode) = LockMode::parse(raw_mode) else {
            self.drop_block(line, Some(pid), format!("unknown lock mode '{raw_mode}'"));
            return;
        };

        let (resource, relation) = parse_target(&caps["target"]);
        let mut blockers = Vec::new();
        if let Some(raw_blockers) = caps.name("blockers") {
            for digits in DIGITS.find_iter(raw_blockers.as_str()) {
                match digits.as_str().parse::<Pid>() {
                    Ok(blocker) if blocker != pid => {
                        if !blockers.contains(&blocker) {
                            blockers.push(blocker);
                        }
                    }
                    Ok(_) => self.warn(line, Some(pid), "process listed as its own blocker; ignored"),
                    Err(_) => self.warn(
                        line,
                        Some(pid),
                        &format!("invalid blocker id '{}'; ignored", digits.as_str()),
                    ),
                }
            }
        }

        self.wait_lines.push(WaitLine {
            line,
            pid,
            lock: LockRef {
                relation,
                mode,
                granted: false,
                resource,
            },
            blockers,
        });
    }

    fn scan_query(&mut self, line: usize, raw_pid: &str, query: &str) {
        let Ok(pid) = raw_pid.parse::<Pid>() else {
            self.warn(line, None, &format!("invalid process id '{raw_pid}' on query line"));
            self.capturing = None;
            return;
        };

        if self.queries.contains_key(&pid) {
            self.warn(line, Some(pid), "duplicate query line; keeping the first");
            self.capturing = None;
            return;
        }

        self.queries.insert(pid, query.trim_start().to_string());
        self.capturing = Some(pid);
    }

    fn record_prefix(&mut self, prefix: &str) {
        let Some(pid) = PREFIX_PID
            .captures(prefix)
            .and_then(|caps| caps[1].parse::<Pid>().ok())
        else {
            return;
        };

        let info = self.prefixes.entry(pid).or_default();
        if info.username.is_none() {
            info.username = PREFIX_USER.captures(prefix).and_then(|caps| {
                caps.get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str().to_string())
            });
        }
        if info.application_name.is_none() {
            info.application_name = PREFIX_APP
                .captures(prefix)
                .map(|caps| caps[1].to_string());
        }
    }

    fn drop_block(&mut self, line: usize, pid: Option<Pid>, message: String) {
        self.dropped += 1;
        self.capturing = None;
        self.warnings.push(ParseWarning {
            line,
            pid,
            message: format!("{message}; block dropped"),
        });
    }

    fn warn(&mut self, line: usize, pid: Option<Pid>, message: &str) {
        self.warnings.push(ParseWarning {
            line,
            pid,
            message: message.to_string(),
        });
    }
}

fn starts_with_anchor(text: &str) -> bool {
    ANCHOR.find(text).is_some_and(|m| m.start() == 0)
}

/// Body of the `DETAIL:` section on a tagged line, if there is one
///
/// Flattened reports carry several sections on one line
/// (`ERROR: ... DETAIL: ... HINT: ...`), so everything before `DETAIL:` and
/// from the next trailing section onwards is cut away.
fn detail_section<'a>(caps: &regex::Captures<'a>) -> Option<&'a str> {
    let mut tag = caps.name("tag")?.as_str();
    let mut rest = caps.name("rest")?.as_str();

    while tag != "DETAIL" {
        if starts_with_anchor(rest) {
            return None;
        }
        let next = TAGGED_LINE.captures(rest)?;
        tag = next.name("tag")?.as_str();
        rest = next.name("rest")?.as_str();
    }

    let end = TRAILING_SECTION.find(rest).map_or(rest.len(), |m| m.start());
    Some(rest[..end].trim())
}

/// Split a line wherever a new `Process N ...` anchor starts
fn split_at_anchors(body: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = ANCHOR.find_iter(body).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    let mut segments = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(body.len());
        let segment = body[start..end].trim();
        if !segment.is_empty() {
            segments.push(segment);
        }
    }
    segments
}

/// Classify the object named after `on` in a `waits for` clause
fn parse_target(target: &str) -> (ResourceKind, String) {
    let target = target.trim();
    let relation_kinds = [
        (&*TUPLE_TARGET, ResourceKind::Tuple),
        (&*PAGE_TARGET, ResourceKind::Page),
        (&*EXTEND_TARGET, ResourceKind::Extend),
        (&*RELATION_TARGET, ResourceKind::Relation),
    ];
    for (pattern, kind) in relation_kinds {
        if let Some(caps) = pattern.captures(target) {
            return (kind, normalize_relation(&caps["name"]));
        }
    }

    if let Some(caps) = TRANSACTION_TARGET.captures(target) {
        return (ResourceKind::Transaction, format!("transaction {}", &caps["xid"]));
    }
    if let Some(caps) = VIRTUAL_TARGET.captures(target) {
        return (
            ResourceKind::VirtualTransaction,
            format!("virtual transaction {}", &caps["vxid"]),
        );
    }
    if target.starts_with("advisory lock") {
        return (ResourceKind::Advisory, target.to_string());
    }
    if target.starts_with("object ") {
        return (ResourceKind::Object, target.to_string());
    }
    (ResourceKind::Other, target.to_string())
}

/// Strip identifier quoting: `"public"."Users"` becomes `public.Users`
fn normalize_relation(name: &str) -> String {
    name.trim()
        .trim_end_matches([';', ','])
        .replace('"', "")
}

/// The lock a blocker must be holding for `waited` to block on it
fn infer_held(waited: &LockRef) -> LockRef {
    let mode = match waited.resource {
        // Every transaction holds ExclusiveLock on its own transaction id
        ResourceKind::Transaction | ResourceKind::VirtualTransaction => LockMode::Exclusive,
        _ => waited.mode.minimal_conflicting(),
    };
    LockRef {
        relation: waited.relation.clone(),
        mode,
        granted: true,
        resource: waited.resource,
    }
}

fn empty_record(pid: Pid) -> ProcessRecord {
    ProcessRecord {
        pid,
        query: None,
        application_name: None,
        username: None,
        tables_accessed: BTreeSet::new(),
        locks_held: Vec::new(),
        locks_waiting: Vec::new(),
        blocked_by: Vec::new(),
    }
}

/// Build immutable process records from the accepted blocks
fn assemble_records(valid: Vec<WaitLine>, scanner: Scanner) -> ParsedDeadlock {
    let Scanner {
        queries,
        prefixes,
        warnings,
        ..
    } = scanner;

    let mut processes: BTreeMap<Pid, ProcessRecord> = BTreeMap::new();
    let mut waits = Vec::new();

    for wait in valid {
        let waiter = processes
            .entry(wait.pid)
            .or_insert_with(|| empty_record(wait.pid));
        if !waiter.locks_waiting.contains(&wait.lock) {
            waiter.locks_waiting.push(wait.lock.clone());
        }
        for &blocker in &wait.blockers {
            if !waiter.blocked_by.contains(&blocker) {
                waiter.blocked_by.push(blocker);
            }
        }

        if wait.blockers.is_empty() {
            waits.push(WaitRelation {
                waiter: wait.pid,
                blocker: None,
                lock: wait.lock.clone(),
            });
        }

        let held = infer_held(&wait.lock);
        for &blocker in &wait.blockers {
            let holder = processes
                .entry(blocker)
                .or_insert_with(|| empty_record(blocker));
            if !holder.locks_held.contains(&held) {
                holder.locks_held.push(held.clone());
            }
            waits.push(WaitRelation {
                waiter: wait.pid,
                blocker: Some(blocker),
                lock: wait.lock.clone(),
            });
        }
    }

    // Backends that only show up on a query line still get a record
    for &pid in queries.keys() {
        processes.entry(pid).or_insert_with(|| empty_record(pid));
    }

    for record in processes.values_mut() {
        record.query = queries.get(&record.pid).cloned();
        if let Some(info) = prefixes.get(&record.pid) {
            record.username = info.username.clone();
            record.application_name = info.application_name.clone();
        }
        record.tables_accessed = record
            .locks_held
            .iter()
            .chain(record.locks_waiting.iter())
            .map(|lock| lock.relation.clone())
            .collect();
    }

    ParsedDeadlock {
        processes,
        waits,
        warnings,
    }
}
