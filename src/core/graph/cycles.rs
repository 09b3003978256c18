//! Cycle detection over the process-only wait-for graph
//!
//! Tarjan's algorithm splits the graph into strongly connected components
//! in O(V + E). Every component with more than one process is then walked
//! with a bounded DFS that lists its elementary cycles. Each walk starts at
//! the smallest pid of the cycle and only steps to larger pids, so every
//! cycle is produced exactly once and already rotated to its minimum pid.
//!
//! Both walks keep their own work stacks, so the depth of a wait chain never
//! reaches the thread stack. The enumeration is exponential on dense
//! components; it stops after [`MAX_CYCLES_PER_COMPONENT`] cycles or
//! [`MAX_SEARCH_STEPS_PER_COMPONENT`] path extensions. A component that yields
//! no cycle within the bounds still reports its shortest cycle, found by BFS.

use crate::core::graph::WaitForGraph;
use crate::core::types::{ParseWarning, Pid};
use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::min;
use std::collections::{BTreeMap, BTreeSet, VecDeque, btree_set};

/// Longest cycle enumerated unless configured otherwise
pub const DEFAULT_MAX_CYCLE_LENGTH: usize = 32;

/// Cycles listed for one component before the enumeration gives up
pub const MAX_CYCLES_PER_COMPONENT: usize = 1_000;

/// Path extensions tried in one component before the enumeration gives up
pub const MAX_SEARCH_STEPS_PER_COMPONENT: usize = 1_000_000;

static NO_SUCCESSORS: BTreeSet<Pid> = BTreeSet::new();

/// A closed wait chain: `pids[0]` waits for `pids[1]`, ..., the last waits for `pids[0]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    /// Rotated so that the smallest pid comes first
    pub pids: Vec<Pid>,
    /// Objects the cycle's processes are waiting on
    pub relations: BTreeSet<String>,
    /// Heuristic score in `0..=100`, filled in by the severity scorer
    pub severity: u8,
}

impl Cycle {
    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.pids.contains(&pid)
    }

    /// Consecutive `(waiter, blocker)` pairs, including the closing edge
    pub fn wait_pairs(&self) -> impl Iterator<Item = (Pid, Pid)> + '_ {
        let n = self.pids.len();
        (0..n).map(move |i| (self.pids[i], self.pids[(i + 1) % n]))
    }
}

/// Cycles found in a graph, plus notes on components the bounds cut short
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSearch {
    pub cycles: Vec<Cycle>,
    /// Not tied to a report line, so `line` is 0
    pub warnings: Vec<ParseWarning>,
}

/// Find all elementary wait cycles in `graph`
///
/// Cycles are deduplicated by their set of processes and sorted by smallest
/// pid, then length, then pid sequence.
pub fn find_cycles(graph: &WaitForGraph, max_len: usize) -> Vec<Cycle> {
    search_cycles(graph, max_len).cycles
}

/// [`find_cycles`], keeping the warnings about truncated components
pub fn search_cycles(graph: &WaitForGraph, max_len: usize) -> CycleSearch {
    let adjacency = graph.adjacency();
    let mut seen: FxHashSet<Vec<Pid>> = FxHashSet::default();
    let mut search = CycleSearch::default();

    for component in tarjan_scc(adjacency) {
        if component.len() < 2 {
            continue;
        }
        let members: BTreeSet<Pid> = component.into_iter().collect();
        let first = members.first().copied();

        let enumerated = elementary_cycles(adjacency, &members, max_len);
        let mut found = enumerated.cycles;
        if let Some(limit) = enumerated.truncated {
            search.warnings.push(ParseWarning {
                line: 0,
                pid: first,
                message: format!(
                    "cycle enumeration stopped at {limit} in a component of {} processes",
                    members.len()
                ),
            });
        }
        if found.is_empty()
            && let Some(shortest) = shortest_cycle(adjacency, &members)
        {
            search.warnings.push(ParseWarning {
                line: 0,
                pid: first,
                message: format!(
                    "no cycle of at most {max_len} processes in a component of {}; \
reporting its shortest cycle of {}",
                    members.len(),
                    shortest.len()
                ),
            });
            found.push(shortest);
        }

        for pids in found {
            let mut key = pids.clone();
            key.sort_unstable();
            if !seen.insert(key) {
                continue;
            }

            let relations = pids_to_relations(graph, &pids);
            search.cycles.push(Cycle {
                pids,
                relations,
                severity: 0,
            });
        }
    }

    search.cycles.sort_by(|a, b| {
        a.pids[0]
            .cmp(&b.pids[0])
            .then(a.len().cmp(&b.len()))
            .then_with(|| a.pids.cmp(&b.pids))
    });
    search
}

fn pids_to_relations(graph: &WaitForGraph, pids: &[Pid]) -> BTreeSet<String> {
    let n = pids.len();
    (0..n)
        .flat_map(|i| graph.wait_locks(pids[i], pids[(i + 1) % n]))
        .map(|lock| lock.relation.clone())
        .collect()
}

fn successors(adjacency: &BTreeMap<Pid, BTreeSet<Pid>>, pid: Pid) -> &BTreeSet<Pid> {
    adjacency.get(&pid).unwrap_or(&NO_SUCCESSORS)
}

/// Strongly connected components of a directed graph
///
/// Every component is returned sorted; components come out in the order
/// Tarjan's algorithm completes them, which is fixed for a given input
/// because `adjacency` is iterated in key order.
pub fn tarjan_scc(adjacency: &BTreeMap<Pid, BTreeSet<Pid>>) -> Vec<Vec<Pid>> {
    let mut all_nodes: BTreeSet<Pid> = BTreeSet::new();
    for (&from, targets) in adjacency {
        all_nodes.insert(from);
        all_nodes.extend(targets.iter().copied());
    }

    let mut state = TarjanState::default();
    for &node in &all_nodes {
        if !state.index.contains_key(&node) {
            strong_connect(node, adjacency, &mut state);
        }
    }
    state.sccs
}

#[derive(Default)]
struct TarjanState {
    index: FxHashMap<Pid, usize>,
    lowlink: FxHashMap<Pid, usize>,
    on_stack: FxHashSet<Pid>,
    stack: Vec<Pid>,
    current_index: usize,
    sccs: Vec<Vec<Pid>>,
}

impl TarjanState {
    fn visit(&mut self, v: Pid) {
        self.index.insert(v, self.current_index);
        self.lowlink.insert(v, self.current_index);
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);
    }

    fn lower(&mut self, v: Pid, candidate: usize) {
        let low = min(self.lowlink[&v], candidate);
        self.lowlink.insert(v, low);
    }
}

/// Tarjan's DFS from `root`, one `(node, remaining successors)` frame per level
fn strong_connect<'a>(
    root: Pid,
    adjacency: &'a BTreeMap<Pid, BTreeSet<Pid>>,
    state: &mut TarjanState,
) {
    let mut work: Vec<(Pid, btree_set::Iter<'a, Pid>)> = Vec::new();
    state.visit(root);
    work.push((root, successors(adjacency, root).iter()));

    while let Some((v, remaining)) = work.last_mut() {
        let v = *v;
        if let Some(&w) = remaining.next() {
            if !state.index.contains_key(&w) {
                state.visit(w);
                work.push((w, successors(adjacency, w).iter()));
            } else if state.on_stack.contains(&w) {
                let index = state.index[&w];
                state.lower(v, index);
            }
            continue;
        }

        work.pop();
        if let Some(&(parent, _)) = work.last() {
            let low = state.lowlink[&v];
            state.lower(parent, low);
        }

        // v is the root of a component
        if state.lowlink[&v] == state.index[&v] {
            let mut component = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            state.sccs.push(component);
        }
    }
}

struct Enumerated {
    cycles: Vec<Vec<Pid>>,
    /// Which bound stopped the walk, if any
    truncated: Option<&'static str>,
}

/// Elementary cycles inside one component, each starting at its smallest pid
fn elementary_cycles(
    adjacency: &BTreeMap<Pid, BTreeSet<Pid>>,
    members: &BTreeSet<Pid>,
    max_len: usize,
) -> Enumerated {
    let mut found = Vec::new();
    let mut steps = 0usize;
    let mut path: Vec<Pid> = Vec::new();
    let mut on_path: FxHashSet<Pid> = FxHashSet::default();

    for &start in members {
        path.clear();
        on_path.clear();
        path.push(start);
        on_path.insert(start);

        // Smaller pids were already used as starting points
        let mut work = vec![successors(adjacency, start).range(start..)];
        while let Some(remaining) = work.last_mut() {
            let Some(&next) = remaining.next() else {
                work.pop();
                if let Some(done) = path.pop() {
                    on_path.remove(&done);
                }
                continue;
            };

            if next == start {
                if path.len() > 1 {
                    found.push(path.clone());
                    if found.len() >= MAX_CYCLES_PER_COMPONENT {
                        return Enumerated {
                            cycles: found,
                            truncated: Some("the cycle limit"),
                        };
                    }
                }
                continue;
            }
            if !members.contains(&next) || on_path.contains(&next) || path.len() >= max_len {
                continue;
            }

            steps += 1;
            if steps > MAX_SEARCH_STEPS_PER_COMPONENT {
                return Enumerated {
                    cycles: found,
                    truncated: Some("the step limit"),
                };
            }
            path.push(next);
            on_path.insert(next);
            work.push(successors(adjacency, next).range(start..));
        }
    }

    Enumerated {
        cycles: found,
        truncated: None,
    }
}

/// Shortest cycle through the smallest member of a component
fn shortest_cycle(
    adjacency: &BTreeMap<Pid, BTreeSet<Pid>>,
    members: &BTreeSet<Pid>,
) -> Option<Vec<Pid>> {
    let start = *members.first()?;
    let mut parent: FxHashMap<Pid, Pid> = FxHashMap::default();
    let mut queue = VecDeque::from([start]);

    while let Some(v) = queue.pop_front() {
        for &w in successors(adjacency, v) {
            if w == start && v != start {
                let mut path = vec![v];
                let mut current = v;
                while let Some(&previous) = parent.get(&current) {
                    path.push(previous);
                    current = previous;
                }
                path.reverse();
                return Some(path);
            }
            if w != start && members.contains(&w) && !parent.contains_key(&w) {
                parent.insert(w, v);
                queue.push_back(w);
            }
        }
    }
    None
}
