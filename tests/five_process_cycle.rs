mod common;
use common::{analyzer, assert_well_formed};

#[test]
fn test_five_process_cycle_with_ddl() {
    let report = "\
2025-01-14 03:12:44.901 UTC [5001] user=migrator,app=flyway ERROR:  deadlock detected
2025-01-14 03:12:44.901 UTC [5001] user=migrator,app=flyway DETAIL:  Process 5001 waits for AccessExclusiveLock on relation 24580 of database 16384; blocked by process 5002.
\tProcess 5002 waits for RowExclusiveLock on relation 24590 of database 16384; blocked by process 5003.
\tProcess 5003 waits for ShareLock on transaction 88120; blocked by process 5004.
\tProcess 5004 waits for ShareLock on transaction 88121; blocked by process 5005.
\tProcess 5005 waits for AccessShareLock on relation 24580 of database 16384; blocked by process 5001.
\tProcess 5001: ALTER TABLE customers ADD COLUMN tier text;
\tProcess 5002: INSERT INTO audit_log SELECT * FROM customers WHERE id = 7;
\tProcess 5003: UPDATE invoices SET paid = true WHERE id = 11;
\tProcess 5004: UPDATE invoices SET paid = true WHERE id = 12;
\tProcess 5005: SELECT * FROM customers WHERE id = 7;
2025-01-14 03:12:44.901 UTC [5001] user=migrator,app=flyway HINT:  See server log for query details.
2025-01-14 03:12:44.901 UTC [5001] user=migrator,app=flyway STATEMENT:  ALTER TABLE customers ADD COLUMN tier text;";

    let analysis = analyzer().analyze_text(report).unwrap();
    assert_well_formed(&analysis);

    assert_eq!(analysis.cycles.len(), 1);
    let cycle = &analysis.cycles[0];
    assert_eq!(cycle.pids, vec![5001, 5002, 5003, 5004, 5005]);
    assert_eq!(cycle.relations.len(), 4);
    // 40 + 3 * 10 + 4 * 5 + 15 for the AccessExclusiveLock
    assert_eq!(cycle.severity, 100);

    let migrator = &analysis.transactions[&5001];
    assert_eq!(migrator.username.as_deref(), Some("migrator"));
    assert_eq!(migrator.application_name.as_deref(), Some("flyway"));
    assert_eq!(analysis.transactions[&5002].username, None);

    assert!(analysis.recommended_fix.contains("`ddl-conflict`"));
    assert!(analysis.recommended_fix.contains("lock_timeout"));
}
