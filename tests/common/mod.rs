use lockscope::{Analyzer, DeadlockAnalysis, EdgeKind, Pid};
use std::collections::BTreeSet;

/// The users/accounts report most tests start from
#[allow(dead_code)]
pub const TWO_PROCESS_REPORT: &str = "ERROR:  deadlock detected
DETAIL:  Process 12345 waits for ShareLock on relation users; blocked by process 67890.
Process 67890 waits for ShareLock on relation accounts; blocked by process 12345.
Process 12345: UPDATE accounts SET balance = balance - 100 WHERE id = 1;
Process 67890: UPDATE users SET status = 'active' WHERE id = 1;
HINT:  See server log for query details.";

/// Analyzer used by the integration tests
///
/// With the logging feature every run also writes an event log, exercising
/// the logger alongside the pipeline.
pub fn analyzer() -> Analyzer {
    let builder = Analyzer::new();

    #[cfg(feature = "logging-and-visualization")]
    let builder = builder.with_log("logs/lockscope_{timestamp}.log");

    builder.start().expect("Failed to initialize analyzer")
}

/// A report in which `pids[i]` waits on `relations[i]`, held by `pids[i + 1]`
#[allow(dead_code)]
pub fn ring_report(pids: &[Pid], relations: &[String], mode: &str) -> String {
    assert_eq!(pids.len(), relations.len());
    let n = pids.len();
    let mut report = String::from("ERROR:  deadlock detected\n");

    for i in 0..n {
        let prefix = if i == 0 { "DETAIL:  " } else { "\t" };
        report.push_str(&format!(
            "{prefix}Process {} waits for {mode} on relation {}; blocked by process {}.\n",
            pids[i],
            relations[i],
            pids[(i + 1) % n]
        ));
    }
    for i in 0..n {
        let previous = (i + n - 1) % n;
        report.push_str(&format!(
            "\tProcess {}: UPDATE {} SET v = v + 1 WHERE id = {i};\n",
            pids[i], relations[previous]
        ));
    }
    report.push_str("HINT:  See server log for query details.\n");
    report
}

/// Check the properties every successful analysis must have
#[allow(dead_code)]
pub fn assert_well_formed(analysis: &DeadlockAnalysis) {
    let waits: BTreeSet<(&str, &str)> = analysis
        .edges
        .iter()
        .filter(|edge| edge.kind == EdgeKind::WaitsFor)
        .map(|edge| (edge.source.as_str(), edge.target.as_str()))
        .collect();

    for cycle in &analysis.cycles {
        assert!(cycle.len() >= 2, "cycle too short: {:?}", cycle.pids);
        assert!(cycle.severity <= 100, "severity out of range: {}", cycle.severity);

        // Walking the cycle through WAITS_FOR edges must return to the start
        for (waiter, blocker) in cycle.wait_pairs() {
            let (source, target) = (format!("process_{waiter}"), format!("process_{blocker}"));
            assert!(
                waits.contains(&(source.as_str(), target.as_str())),
                "no WAITS_FOR edge {waiter} -> {blocker} for cycle {:?}",
                cycle.pids
            );
            assert!(analysis.transactions.contains_key(&waiter));
        }
    }

    for edge in &analysis.edges {
        for end in [&edge.source, &edge.target] {
            if let Some(pid) = end.strip_prefix("process_") {
                let pid: Pid = pid.parse().expect("numeric process id");
                assert!(
                    analysis.transactions.contains_key(&pid),
                    "edge endpoint {end} has no transaction"
                );
            }
        }
    }

    assert!(analysis.severity <= 100);
    assert_eq!(
        analysis.severity,
        analysis.cycles.iter().map(|c| c.severity).max().unwrap_or(0)
    );
}
