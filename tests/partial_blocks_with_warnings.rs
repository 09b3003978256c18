mod common;
use common::{analyzer, assert_well_formed};
use lockscope::GraphNode;

#[test]
fn test_cycle_survives_malformed_and_bystander_blocks() {
    let report = "ERROR:  deadlock detected
DETAIL:  Process 11 waits for ExclusiveLock on relation ledger; blocked by process 12.
Process 12 waits for ExclusiveLock on relation journal; blocked by process 11.
Process 13 waits for FancyLock on relation ledger; blocked by process 11.
Process 14 waits for RowShareLock on relation journal; blocked by process 12.
Process 15 waits for ShareLock on relation archive; blocked by process 11.
Process 11: LOCK TABLE journal IN EXCLUSIVE MODE
Process 12: LOCK TABLE ledger IN EXCLUSIVE MODE
Process 13: SELECT 1
Process 14: SELECT * FROM journal FOR UPDATE
HINT:  See server log for query details.";

    let analysis = analyzer().analyze_text(report).unwrap();
    assert_well_formed(&analysis);

    // 13 has an unknown lock mode, 15 has no statement
    let warned: Vec<Option<u32>> = analysis.metadata.warnings.iter().map(|w| w.pid).collect();
    assert_eq!(warned, vec![Some(13), Some(15)]);
    assert!(analysis.metadata.warnings[0].message.contains("FancyLock"));
    assert_eq!(analysis.metadata.warnings[0].line, 4);

    assert_eq!(analysis.cycles.len(), 1);
    assert_eq!(analysis.cycles[0].pids, vec![11, 12]);

    // 14 waits on the cycle but is not part of it
    let bystander = analysis
        .nodes
        .iter()
        .find(|n| n.id() == "process_14")
        .unwrap();
    assert!(!bystander.in_cycle());
    assert!(!analysis.transactions.contains_key(&15));

    // 13 only shows up on a query line
    match analysis.nodes.iter().find(|n| n.id() == "process_13") {
        Some(GraphNode::Process(node)) => {
            assert_eq!(node.query.as_deref(), Some("SELECT 1"));
            assert!(node.locks_waiting.is_empty());
        }
        other => panic!("expected process_13 node, got {other:?}"),
    }

    // Relation-level ExclusiveLock on both tables
    assert_eq!(analysis.cycles[0].severity, 40 + 10 + 15);
}
