//! Heuristic severity score for a wait cycle
//!
//! The score is not a measurement. It ranks cycles by how disruptive they
//! tend to be in practice:
//!
//! | Factor                                                   | Points |
//! |----------------------------------------------------------|--------|
//! | Base (two-process cycle)                                 | 40     |
//! | Each process beyond the second                           | +10    |
//! | Each distinct relation waited on                         | +5     |
//! | A relation-level `Exclusive`/`AccessExclusive` lock      | +15    |
//! | A participant runs a multi-table `UPDATE`/`DELETE`       | +10    |
//!
//! The sum is clamped to `0..=100`. Locks on transaction ids are row-level
//! contention and never count as table-exclusive.

use crate::core::graph::{Cycle, WaitForGraph};
use crate::core::types::{LockRef, ResourceKind};
use regex::Regex;

lazy_static::lazy_static! {
    static ref DML_STATEMENT: Regex = Regex::new(r"(?is)^\s*(?:with\b.*?\)\s*)?(?:update|delete)\b").unwrap();
    static ref MULTI_TABLE_CLAUSE: Regex = Regex::new(
        r"(?is)\bupdate\b.+?\bfrom\b|\bdelete\b.+?\busing\b|\b(?:update|delete)\b.+?\bjoin\b"
    ).unwrap();
}

const BASE_SCORE: u32 = 40;
const PER_EXTRA_PROCESS: u32 = 10;
const PER_RELATION: u32 = 5;
const TABLE_EXCLUSIVE_PENALTY: u32 = 15;
const MULTI_TABLE_DML_PENALTY: u32 = 10;

/// Score a single cycle
pub fn score(cycle: &Cycle, graph: &WaitForGraph) -> u8 {
    let mut total = BASE_SCORE;
    total += PER_EXTRA_PROCESS * cycle.len().saturating_sub(2) as u32;
    total += PER_RELATION * cycle.relations.len() as u32;

    if has_table_exclusive_lock(cycle, graph) {
        total += TABLE_EXCLUSIVE_PENALTY;
    }
    if has_multi_table_dml(cycle, graph) {
        total += MULTI_TABLE_DML_PENALTY;
    }

    total.min(100) as u8
}

/// Whether a statement is an `UPDATE`/`DELETE` that reads other tables
///
/// Matches `UPDATE ... FROM`, `DELETE ... USING` and joins inside either.
/// Substring heuristic; a subquery in `SET` also counts.
pub fn is_multi_table_dml(query: &str) -> bool {
    DML_STATEMENT.is_match(query) && MULTI_TABLE_CLAUSE.is_match(query)
}

fn is_table_exclusive(lock: &LockRef) -> bool {
    lock.resource == ResourceKind::Relation && lock.mode.is_table_exclusive()
}

pub(crate) fn has_table_exclusive_lock(cycle: &Cycle, graph: &WaitForGraph) -> bool {
    let waited = cycle
        .wait_pairs()
        .flat_map(|(waiter, blocker)| graph.wait_locks(waiter, blocker))
        .any(is_table_exclusive);

    waited
        || cycle
            .pids
            .iter()
            .filter_map(|&pid| graph.process(pid))
            .flat_map(|node| node.locks_held.iter())
            .any(is_table_exclusive)
}

pub(crate) fn has_multi_table_dml(cycle: &Cycle, graph: &WaitForGraph) -> bool {
    cycle
        .pids
        .iter()
        .filter_map(|&pid| graph.process(pid))
        .filter_map(|node| node.query.as_deref())
        .any(is_multi_table_dml)
}
