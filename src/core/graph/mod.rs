//! Graph module for deadlock analysis
//!
//! This module contains the graph side of the pipeline:
//! - Wait-for graph: which backend waits for which, and which tables they touch
//! - Cycles: strongly connected components and the elementary cycles inside them

pub mod cycles;
pub mod wait_for_graph;

pub use cycles::{
    Cycle, CycleSearch, DEFAULT_MAX_CYCLE_LENGTH, MAX_CYCLES_PER_COMPONENT,
    MAX_SEARCH_STEPS_PER_COMPONENT, find_cycles, search_cycles, tarjan_scc,
};
pub use wait_for_graph::{
    EdgeKind, GraphEdge, GraphNode, ProcessNode, TableNode, WaitForGraph, process_node_id,
};
