//! Wait-For Graph reconstructed from a deadlock report
//!
//! The graph has two kinds of nodes: backend processes and the tables
//! (or other lockable objects) they touch. It has two kinds of edges:
//! 1. *WAITS_FOR*: `A -> B` means backend A is blocked on a lock B holds.
//!    When the report names no blocker, the edge points at the table instead.
//! 2. *ACCESSES*: `A -> table` for every table A touches that is not already
//!    covered by a WAITS_FOR edge to that table.
//!
//! Alongside the renderable node and edge lists, the graph keeps a
//! process-only adjacency list in sorted containers. Cycle detection walks that
//! list, so the results never depend on hash iteration order.

use crate::core::parser::ParsedDeadlock;
use crate::core::types::{LockRef, Pid, ProcessRecord};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Node id of a backend process
pub fn process_node_id(pid: Pid) -> String {
    format!("process_{pid}")
}

/// Node id of a table or other lockable object
pub fn table_node_id(name: &str) -> String {
    format!("table_{name}")
}

/// A node of the rendered graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphNode {
    Process(ProcessNode),
    Table(TableNode),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Process(node) => &node.id,
            GraphNode::Table(node) => &node.id,
        }
    }

    pub fn in_cycle(&self) -> bool {
        match self {
            GraphNode::Process(node) => node.in_cycle,
            GraphNode::Table(node) => node.in_cycle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessNode {
    pub id: String,
    pub label: String,
    pub pid: Pid,
    pub tables_accessed: BTreeSet<String>,
    pub query: Option<String>,
    pub locks_held: Vec<LockRef>,
    pub locks_waiting: Vec<LockRef>,
    pub in_cycle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableNode {
    pub id: String,
    pub label: String,
    pub in_cycle: bool,
}

/// Relationship types between graph nodes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    WaitsFor,
    Accesses,
}

/// A directed edge of the rendered graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// Lock mode description shown next to the edge
    pub detail: String,
    pub in_cycle: bool,
}

/// Edge target before it is turned into a node id; orders processes first
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Endpoint {
    Process(Pid),
    Table(String),
}

impl Endpoint {
    fn node_id(&self) -> String {
        match self {
            Endpoint::Process(pid) => process_node_id(*pid),
            Endpoint::Table(name) => table_node_id(name),
        }
    }
}

/// Directed wait-for graph of one deadlock report
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    /// Process nodes sorted by pid, then table nodes sorted by name
    pub(crate) nodes: Vec<GraphNode>,
    /// Sorted by kind, source, target and detail
    pub(crate) edges: Vec<GraphEdge>,
    /// Process-only wait edges: waiter -> blockers
    pub(crate) adjacency: BTreeMap<Pid, BTreeSet<Pid>>,
    /// Locks behind each process-to-process wait edge
    pub(crate) edge_locks: BTreeMap<(Pid, Pid), Vec<LockRef>>,
    /// Node id -> position in `nodes`
    index: FxHashMap<String, usize>,
}

impl WaitForGraph {
    /// Build the graph for a parsed report
    pub fn build(parsed: &ParsedDeadlock) -> Self {
        let mut graph = WaitForGraph::default();

        for record in parsed.processes.values() {
            graph.push_node(GraphNode::Process(process_node(record)));
        }

        let tables: BTreeSet<&String> = parsed
            .processes
            .values()
            .flat_map(|record| record.tables_accessed.iter())
            .collect();
        for table in tables {
            graph.push_node(GraphNode::Table(TableNode {
                id: table_node_id(table),
                label: table.clone(),
                in_cycle: false,
            }));
        }

        // (kind, source, target, detail); the set removes exact duplicates
        // while keeping parallel edges with different details
        let mut pending: BTreeSet<(EdgeKind, Pid, Endpoint, String)> = BTreeSet::new();
        let mut waits_on_table: BTreeSet<(Pid, &str)> = BTreeSet::new();

        for wait in &parsed.waits {
            let target = match wait.blocker {
                Some(blocker) => {
                    graph
                        .adjacency
                        .entry(wait.waiter)
                        .or_default()
                        .insert(blocker);
                    let locks = graph.edge_locks.entry((wait.waiter, blocker)).or_default();
                    if !locks.contains(&wait.lock) {
                        locks.push(wait.lock.clone());
                    }
                    Endpoint::Process(blocker)
                }
                None => {
                    waits_on_table.insert((wait.waiter, wait.lock.relation.as_str()));
                    Endpoint::Table(wait.lock.relation.clone())
                }
            };
            pending.insert((EdgeKind::WaitsFor, wait.waiter, target, wait.lock.describe()));
        }

        for record in parsed.processes.values() {
            for table in &record.tables_accessed {
                if waits_on_table.contains(&(record.pid, table.as_str())) {
                    continue;
                }
                pending.insert((
                    EdgeKind::Accesses,
                    record.pid,
                    Endpoint::Table(table.clone()),
                    describe_access(record, table),
                ));
            }
        }

        graph.edges = pending
            .into_iter()
            .map(|(kind, source, target, detail)| GraphEdge {
                source: process_node_id(source),
                target: target.node_id(),
                kind,
                detail,
                in_cycle: false,
            })
            .collect();

        graph
    }

    fn push_node(&mut self, node: GraphNode) {
        self.index.insert(node.id().to_string(), self.nodes.len());
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// The process node for `pid`
    pub fn process(&self, pid: Pid) -> Option<&ProcessNode> {
        match self.node(&process_node_id(pid)) {
            Some(GraphNode::Process(node)) => Some(node),
            _ => None,
        }
    }

    /// Process-only adjacency used for cycle detection
    pub fn adjacency(&self) -> &BTreeMap<Pid, BTreeSet<Pid>> {
        &self.adjacency
    }

    /// Locks `waiter` is blocked on where `blocker` is the holder
    pub fn wait_locks(&self, waiter: Pid, blocker: Pid) -> &[LockRef] {
        self.edge_locks
            .get(&(waiter, blocker))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a WAITS_FOR edge `waiter -> blocker` exists
    pub fn waits_for(&self, waiter: Pid, blocker: Pid) -> bool {
        self.adjacency
            .get(&waiter)
            .is_some_and(|blockers| blockers.contains(&blocker))
    }
}

fn process_node(record: &ProcessRecord) -> ProcessNode {
    let label = match &record.application_name {
        Some(app) => format!("PID {} ({app})", record.pid),
        None => format!("PID {}", record.pid),
    };
    ProcessNode {
        id: process_node_id(record.pid),
        label,
        pid: record.pid,
        tables_accessed: record.tables_accessed.clone(),
        query: record.query.clone(),
        locks_held: record.locks_held.clone(),
        locks_waiting: record.locks_waiting.clone(),
        in_cycle: false,
    }
}

/// `holds RowExclusiveLock; waits for ShareLock` style summary of one table
fn describe_access(record: &ProcessRecord, table: &str) -> String {
    let modes = |locks: &[LockRef]| -> Vec<String> {
        let mut modes: Vec<_> = locks
            .iter()
            .filter(|lock| lock.relation == table)
            .map(|lock| lock.mode)
            .collect();
        modes.sort();
        modes.dedup();
        modes.iter().map(|mode| mode.to_string()).collect()
    };

    let held = modes(&record.locks_held);
    let waiting = modes(&record.locks_waiting);
    match (held.is_empty(), waiting.is_empty()) {
        (false, false) => format!("holds {}; waits for {}", held.join(", "), waiting.join(", ")),
        (false, true) => format!("holds {}", held.join(", ")),
        (true, false) => format!("waits for {}", waiting.join(", ")),
        (true, true) => "accesses".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse;

    #[test]
    fn test_nodes_and_edges_for_two_process_cycle() {
        let parsed = parse(
            "Process 2 waits for ShareLock on relation users; blocked by process 1.\n\
Process 2: UPDATE accounts SET v = 1\n\
Process 1 waits for ShareLock on relation accounts; blocked by process 2.\n\
Process 1: UPDATE users SET v = 1",
        )
        .unwrap();
        let graph = WaitForGraph::build(&parsed);

        let ids: Vec<&str> = graph.nodes().iter().map(GraphNode::id).collect();
        assert_eq!(
            ids,
            vec!["process_1", "process_2", "table_accounts", "table_users"]
        );

        let waits: Vec<(&str, &str)> = graph
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::WaitsFor)
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(waits, vec![("process_1", "process_2"), ("process_2", "process_1")]);

        // Each process touches both tables and waits on neither table directly
        let accesses = graph
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::Accesses)
            .count();
        assert_eq!(accesses, 4);
        assert!(graph.waits_for(1, 2));
        assert_eq!(graph.wait_locks(1, 2)[0].relation, "accounts");
        assert_eq!(graph.process(2).unwrap().label, "PID 2");
    }

    #[test]
    fn test_parallel_edges_with_different_details_are_kept() {
        let parsed = parse(
            "Process 1 waits for ShareLock on relation a; blocked by process 2.\n\
Process 1 waits for ExclusiveLock on relation b; blocked by process 2.\n\
Process 1: UPDATE a SET v = 1\n\
Process 2 waits for ShareLock on relation a; blocked by process 1.\n\
Process 2: UPDATE b SET v = 1",
        )
        .unwrap();
        let graph = WaitForGraph::build(&parsed);

        let parallel: Vec<&str> = graph
            .edges()
            .iter()
            .filter(|e| e.source == "process_1" && e.target == "process_2")
            .map(|e| e.detail.as_str())
            .collect();
        assert_eq!(
            parallel,
            vec!["ExclusiveLock on relation b", "ShareLock on relation a"]
        );
        assert_eq!(graph.wait_locks(1, 2).len(), 2);
    }

    #[test]
    fn test_unknown_blocker_waits_on_table() {
        let parsed = parse(
            "Process 9 waits for AccessExclusiveLock on relation jobs\nProcess 9: TRUNCATE jobs",
        )
        .unwrap();
        let graph = WaitForGraph::build(&parsed);

        assert_eq!(graph.edges().len(), 1);
        let edge = &graph.edges()[0];
        assert_eq!(edge.kind, EdgeKind::WaitsFor);
        assert_eq!(edge.target, "table_jobs");
        assert!(graph.adjacency().is_empty());
    }
}
