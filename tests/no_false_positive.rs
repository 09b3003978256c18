mod common;
use common::analyzer;
use lockscope::AnalyzerError;

#[test]
fn test_wait_chain_without_cycle() {
    // 1 -> 2 -> 3, and 3 is not waiting on anyone
    let report = "ERROR:  deadlock detected\n\
DETAIL:  Process 1 waits for ShareLock on relation a; blocked by process 2.\n\
Process 2 waits for ShareLock on relation b; blocked by process 3.\n\
Process 1: UPDATE b SET v = 1\n\
Process 2: UPDATE c SET v = 1";

    assert!(matches!(
        analyzer().analyze_text(report),
        Err(AnalyzerError::NoCyclesFound)
    ));
}

#[test]
fn test_shared_table_access_without_cycle() {
    // Both processes touch the same tables but only one of them waits
    let report = "Process 7 waits for RowExclusiveLock on relation inventory; blocked by process 8.\n\
Process 7: UPDATE inventory SET qty = qty - 1 WHERE sku = 'A'\n\
Process 8: UPDATE inventory SET qty = qty + 1 WHERE sku = 'B'";

    assert!(matches!(
        analyzer().analyze_text(report),
        Err(AnalyzerError::NoCyclesFound)
    ));
}

#[test]
fn test_waits_on_objects_without_blockers() {
    let report = "Process 5 waits for ExclusiveLock on advisory lock [16384,1,0,1]\n\
Process 5: SELECT pg_advisory_lock(1)\n\
Process 6 waits for ShareLock on relation jobs\n\
Process 6: SELECT * FROM jobs FOR SHARE";

    assert!(matches!(
        analyzer().analyze_text(report),
        Err(AnalyzerError::NoCyclesFound)
    ));
}
