//! Remediation advice for detected cycles
//!
//! Advice comes from an ordered table of rules. Each rule pairs a predicate
//! over the structural facts of one cycle with a Markdown template. The first
//! rule that matches a cycle renders its section. Cycles no rule matches get
//! the generic "review transaction ordering" advice.

use crate::core::graph::{Cycle, WaitForGraph};
use crate::core::severity::{has_multi_table_dml, has_table_exclusive_lock};
use crate::core::types::{LockMode, LockRef, Pid, ResourceKind};
use std::collections::BTreeSet;
use std::fmt::Write;

/// What the engine gets to look at
pub struct PartialAnalysis<'a> {
    pub graph: &'a WaitForGraph,
    pub cycles: &'a [Cycle],
}

/// One wait edge on a cycle
#[derive(Debug, Clone)]
pub struct CycleWait {
    pub waiter: Pid,
    pub blocker: Pid,
    pub lock: LockRef,
}

/// Structural features of a cycle that rules match on
#[derive(Debug, Clone)]
pub struct CycleFacts<'a> {
    pub cycle: &'a Cycle,
    pub waits: Vec<CycleWait>,
    pub queries: Vec<(Pid, Option<&'a str>)>,
    pub table_exclusive: bool,
    pub multi_table_dml: bool,
}

impl<'a> CycleFacts<'a> {
    pub fn collect(cycle: &'a Cycle, graph: &'a WaitForGraph) -> Self {
        let waits = cycle
            .wait_pairs()
            .flat_map(|(waiter, blocker)| {
                graph
                    .wait_locks(waiter, blocker)
                    .iter()
                    .map(move |lock| CycleWait {
                        waiter,
                        blocker,
                        lock: lock.clone(),
                    })
            })
            .collect();
        let queries = cycle
            .pids
            .iter()
            .map(|&pid| (pid, graph.process(pid).and_then(|node| node.query.as_deref())))
            .collect();

        CycleFacts {
            cycle,
            waits,
            queries,
            table_exclusive: has_table_exclusive_lock(cycle, graph),
            multi_table_dml: has_multi_table_dml(cycle, graph),
        }
    }

    fn any_mode(&self, mode: LockMode) -> bool {
        self.waits.iter().any(|wait| wait.lock.mode == mode)
    }

    fn chain(&self) -> String {
        let mut chain: Vec<String> = self.cycle.pids.iter().map(Pid::to_string).collect();
        if let Some(first) = self.cycle.pids.first() {
            chain.push(first.to_string());
        }
        chain.join(" → ")
    }

    /// Relations in the order they should be locked
    fn suggested_order(&self) -> Vec<&str> {
        self.cycle.relations.iter().map(String::as_str).collect()
    }
}

/// A `(predicate, template)` pair
pub struct Rule {
    pub name: &'static str,
    pub title: &'static str,
    pub applies: fn(&CycleFacts) -> bool,
    pub render: fn(&CycleFacts) -> String,
}

/// The rule table, evaluated top to bottom
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "ddl-conflict",
            title: "Schema change colliding with live traffic",
            applies: |facts| facts.any_mode(LockMode::AccessExclusive) && facts.table_exclusive,
            render: render_ddl_conflict,
        },
        Rule {
            name: "opposite-order-two-tables",
            title: "Two tables locked in opposite order",
            applies: is_opposite_order,
            render: render_opposite_order,
        },
        Rule {
            name: "row-lock-ordering",
            title: "Row locks taken in inconsistent order",
            applies: |facts| {
                !facts.waits.is_empty() && facts.waits.iter().all(|w| w.lock.resource.is_row_level())
            },
            render: render_row_lock_ordering,
        },
        Rule {
            name: "multi-table-dml",
            title: "Multi-table UPDATE/DELETE widening the lock footprint",
            applies: |facts| facts.multi_table_dml,
            render: render_multi_table_dml,
        },
        Rule {
            name: "long-chain",
            title: "Wait chain across three or more transactions",
            applies: |facts| facts.cycle.len() >= 3,
            render: render_long_chain,
        },
    ]
}

/// Both processes wait on a different relation, the one the other holds
fn is_opposite_order(facts: &CycleFacts) -> bool {
    if facts.cycle.len() != 2 || facts.cycle.relations.len() != 2 {
        return false;
    }
    if facts.waits.iter().any(|wait| {
        matches!(
            wait.lock.resource,
            ResourceKind::Transaction | ResourceKind::VirtualTransaction
        )
    }) {
        return false;
    }

    let waited_by = |pid: Pid| -> BTreeSet<&str> {
        facts
            .waits
            .iter()
            .filter(|wait| wait.waiter == pid)
            .map(|wait| wait.lock.relation.as_str())
            .collect()
    };
    let first = waited_by(facts.cycle.pids[0]);
    let second = waited_by(facts.cycle.pids[1]);
    first.len() == 1 && second.len() == 1 && first != second
}

fn statements(facts: &CycleFacts) -> String {
    let mut out = String::new();
    for (pid, query) in &facts.queries {
        match query {
            Some(query) => {
                let _ = writeln!(out, "- Process {pid}: `{}`", one_line(query));
            }
            None => {
                let _ = writeln!(out, "- Process {pid}: statement not captured");
            }
        }
    }
    out
}

fn one_line(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn waits_list(facts: &CycleFacts) -> String {
    let mut out = String::new();
    for wait in &facts.waits {
        let _ = writeln!(
            out,
            "- Process {} waits for {} held by process {}",
            wait.waiter,
            wait.lock.describe(),
            wait.blocker
        );
    }
    out
}

fn render_ddl_conflict(facts: &CycleFacts) -> String {
    let relations = quoted_list(facts.suggested_order());
    format!(
        "An `AccessExclusiveLock` on {relations} is part of the cycle. This lock is taken by \
`ALTER TABLE`, `DROP`, `TRUNCATE`, `VACUUM FULL` and `LOCK TABLE`.\n\n\
{}\n\
1. Run schema changes with a short `lock_timeout` (for example `SET lock_timeout = '2s'`) and retry instead of queueing behind live transactions.\n\
2. Take the exclusive lock first, at the top of the migration transaction, before touching any other table.\n\
3. Schedule the change outside peak traffic, or use non-blocking variants such as `CREATE INDEX CONCURRENTLY`.\n",
        waits_list(facts)
    )
}

fn render_opposite_order(facts: &CycleFacts) -> String {
    let order = facts.suggested_order();
    let (first, second) = (order[0], order[1]);
    format!(
        "Each transaction locks `{first}` and `{second}`, but in opposite order. Each ends up \
holding the table the other one needs.\n\n\
{}\n\
Statements involved:\n\
{}\n\
1. Make every transaction that touches both tables lock `{first}` first and `{second}` second.\n\
2. If the statements cannot be reordered, take both locks up front, e.g. \
`SELECT ... FROM {first} ... FOR UPDATE` followed by `SELECT ... FROM {second} ... FOR UPDATE`.\n",
        waits_list(facts),
        statements(facts)
    )
}

fn render_row_lock_ordering(facts: &CycleFacts) -> String {
    format!(
        "Every wait in this cycle is on a row (a transaction id or tuple lock). The transactions \
update the same rows in different orders.\n\n\
Statements involved:\n\
{}\n\
1. Touch rows in a deterministic order, e.g. `SELECT ... FOR UPDATE ... ORDER BY id` before updating.\n\
2. Batch updates sorted by primary key instead of in arrival order.\n\
3. Keep these transactions short so that the lock windows overlap less.\n",
        statements(facts)
    )
}

fn render_multi_table_dml(facts: &CycleFacts) -> String {
    let relations = quoted_list(facts.suggested_order());
    format!(
        "A participant runs an `UPDATE ... FROM`, `DELETE ... USING` or joined statement. \
It holds locks on {relations} for the whole statement.\n\n\
Statements involved:\n\
{}\n\
1. Split the statement so that each step locks one table, in a fixed order.\n\
2. Lock the rows you are about to change up front with `SELECT ... FOR UPDATE`, in primary key order.\n",
        statements(facts)
    )
}

fn render_long_chain(facts: &CycleFacts) -> String {
    let order = facts
        .suggested_order()
        .iter()
        .map(|relation| format!("`{relation}`"))
        .collect::<Vec<_>>()
        .join(" → ");
    format!(
        "{} transactions wait on each other in a ring.\n\n\
{}\n\
1. Define one global lock order for these objects and follow it everywhere: {order}.\n\
2. Consider taking all the locks a transaction needs at its start.\n",
        facts.cycle.len(),
        waits_list(facts)
    )
}

fn render_fallback(facts: &CycleFacts) -> String {
    format!(
        "No specific pattern matched.\n\n\
{}\n\
Review transaction ordering: every code path should acquire locks on shared objects in the same order.\n",
        waits_list(facts)
    )
}

fn quoted_list(relations: Vec<&str>) -> String {
    relations
        .iter()
        .map(|relation| format!("`{relation}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render remediation advice with the default rule table
pub fn recommend(analysis: &PartialAnalysis) -> String {
    recommend_with(analysis, &default_rules())
}

/// Render remediation advice with a custom rule table
pub fn recommend_with(analysis: &PartialAnalysis, rules: &[Rule]) -> String {
    let mut doc = String::from("## Deadlock remediation\n");

    for (i, cycle) in analysis.cycles.iter().enumerate() {
        let facts = CycleFacts::collect(cycle, analysis.graph);
        let matched = rules.iter().find(|rule| (rule.applies)(&facts));
        let (name, title, body) = match matched {
            Some(rule) => (rule.name, rule.title, (rule.render)(&facts)),
            None => (
                "review-transaction-ordering",
                "Review transaction ordering",
                render_fallback(&facts),
            ),
        };

        let _ = write!(
            doc,
            "\n### Cycle {}: {}\n\n**Pattern:** {title} (`{name}`)  \n**Severity:** {}/100\n\n{body}",
            i + 1,
            facts.chain(),
            cycle.severity
        );
    }

    doc.push_str(
        "\n### General guidance\n\n\
- PostgreSQL has already aborted one transaction with SQLSTATE `40P01` (`deadlock_detected`). \
Retry it from the start in application code.\n\
- Keep transactions short and avoid user interaction or network calls while holding locks.\n\
- The severity score is a heuristic ranking, not a measurement of impact.\n",
    );
    doc
}
