//! Packaging the pipeline output for the rendering layer

use crate::core::graph::{Cycle, EdgeKind, GraphEdge, GraphNode, WaitForGraph, process_node_id};
use crate::core::types::{LockMode, ParseWarning, Pid, ProcessRecord, ResourceKind};
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version tag of the diagnostic grammar understood by the parser
pub const PARSER_VERSION: &str = concat!("pg-deadlock/", env!("CARGO_PKG_VERSION"));

/// Root output of one analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadlockAnalysis {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub cycles: Vec<Cycle>,
    pub transactions: BTreeMap<Pid, ProcessRecord>,
    pub locks: Vec<LockEntry>,
    /// Markdown remediation document
    pub recommended_fix: String,
    /// Highest cycle severity
    pub severity: u8,
    pub metadata: AnalysisMetadata,
}

impl DeadlockAnalysis {
    /// Copy with the wall-clock timing zeroed, for byte-level comparisons
    pub fn without_timing(mut self) -> Self {
        self.metadata.parse_duration_micros = 0;
        self
    }
}

/// A lock together with the backend that holds or awaits it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    pub pid: Pid,
    pub relation: String,
    pub mode: LockMode,
    pub granted: bool,
    pub resource: ResourceKind,
}

/// Bookkeeping attached to every analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    /// Wall-clock time spent in the pipeline; ignored by `PartialEq`
    pub parse_duration_micros: u64,
    pub parser_version: String,
    pub cycle_count: usize,
    pub process_count: usize,
    pub relation_count: usize,
    pub warnings: Vec<ParseWarning>,
}

impl PartialEq for AnalysisMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.parser_version == other.parser_version
            && self.cycle_count == other.cycle_count
            && self.process_count == other.process_count
            && self.relation_count == other.relation_count
            && self.warnings == other.warnings
    }
}

impl AnalysisMetadata {
    pub fn new(parse_duration_micros: u64, warnings: Vec<ParseWarning>) -> Self {
        AnalysisMetadata {
            parse_duration_micros,
            parser_version: PARSER_VERSION.to_string(),
            cycle_count: 0,
            process_count: 0,
            relation_count: 0,
            warnings,
        }
    }
}

/// Mark cycle participation, merge severities and flatten locks
///
/// Pure data transformation; the result is checked with [`validate`] by the
/// caller.
pub fn assemble(
    graph: WaitForGraph,
    cycles: Vec<Cycle>,
    transactions: BTreeMap<Pid, ProcessRecord>,
    recommended_fix: String,
    mut metadata: AnalysisMetadata,
) -> DeadlockAnalysis {
    let cycle_pids: FxHashSet<Pid> = cycles.iter().flat_map(|c| c.pids.iter().copied()).collect();
    let cycle_relations: FxHashSet<&str> = cycles
        .iter()
        .flat_map(|c| c.relations.iter().map(String::as_str))
        .collect();
    let cycle_edges: FxHashSet<(String, String)> = cycles
        .iter()
        .flat_map(|c| c.wait_pairs())
        .map(|(waiter, blocker)| (process_node_id(waiter), process_node_id(blocker)))
        .collect();

    let WaitForGraph {
        mut nodes,
        mut edges,
        ..
    } = graph;

    for node in &mut nodes {
        match node {
            GraphNode::Process(process) => process.in_cycle = cycle_pids.contains(&process.pid),
            GraphNode::Table(table) => {
                table.in_cycle = cycle_relations.contains(table.label.as_str())
            }
        }
    }

    for edge in &mut edges {
        edge.in_cycle = edge.kind == EdgeKind::WaitsFor
            && cycle_edges.contains(&(edge.source.clone(), edge.target.clone()));
    }

    let locks = transactions
        .values()
        .flat_map(|record| {
            record
                .locks_held
                .iter()
                .chain(record.locks_waiting.iter())
                .map(|lock| LockEntry {
                    pid: record.pid,
                    relation: lock.relation.clone(),
                    mode: lock.mode,
                    granted: lock.granted,
                    resource: lock.resource,
                })
        })
        .collect();

    let severity = cycles.iter().map(|c| c.severity).max().unwrap_or(0);
    metadata.cycle_count = cycles.len();
    metadata.process_count = transactions.len();
    metadata.relation_count = nodes
        .iter()
        .filter(|node| matches!(node, GraphNode::Table(_)))
        .count();

    DeadlockAnalysis {
        nodes,
        edges,
        cycles,
        transactions,
        locks,
        recommended_fix,
        severity,
        metadata,
    }
}

/// Check the structural invariants of an assembled analysis
///
/// A violation means the graph builder or assembler has a bug.
pub fn validate(analysis: &DeadlockAnalysis) -> Result<(), String> {
    let node_ids: FxHashSet<&str> = analysis.nodes.iter().map(GraphNode::id).collect();

    for node in &analysis.nodes {
        if let GraphNode::Process(process) = node
            && !analysis.transactions.contains_key(&process.pid)
        {
            return Err(format!("process node {} has no transaction", process.id));
        }
    }

    let mut waits: FxHashSet<(&str, &str)> = FxHashSet::default();
    for edge in &analysis.edges {
        for end in [&edge.source, &edge.target] {
            if !node_ids.contains(end.as_str()) {
                return Err(format!(
                    "edge {} -> {} references unknown node {end}",
                    edge.source, edge.target
                ));
            }
        }
        if edge.kind == EdgeKind::WaitsFor {
            waits.insert((edge.source.as_str(), edge.target.as_str()));
        }
    }

    for cycle in &analysis.cycles {
        if cycle.pids.len() < 2 {
            return Err(format!("cycle {:?} has fewer than two processes", cycle.pids));
        }
        if cycle.severity > 100 {
            return Err(format!("cycle {:?} severity {} out of range", cycle.pids, cycle.severity));
        }
        for (waiter, blocker) in cycle.wait_pairs() {
            if !analysis.transactions.contains_key(&waiter) {
                return Err(format!("cycle references unknown process {waiter}"));
            }
            let (from, to) = (process_node_id(waiter), process_node_id(blocker));
            if !waits.contains(&(from.as_str(), to.as_str())) {
                return Err(format!(
                    "cycle {:?} is not closed: no wait edge {waiter} -> {blocker}",
                    cycle.pids
                ));
            }
        }
    }

    let cycle_pids: FxHashSet<Pid> = analysis
        .cycles
        .iter()
        .flat_map(|c| c.pids.iter().copied())
        .collect();
    let cycle_relations: FxHashSet<&str> = analysis
        .cycles
        .iter()
        .flat_map(|c| c.relations.iter().map(String::as_str))
        .collect();
    for node in &analysis.nodes {
        let expected = match node {
            GraphNode::Process(process) => cycle_pids.contains(&process.pid),
            GraphNode::Table(table) => cycle_relations.contains(table.label.as_str()),
        };
        if node.in_cycle() != expected {
            return Err(format!("node {} has inconsistent inCycle flag", node.id()));
        }
    }

    Ok(())
}
