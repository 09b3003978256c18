mod common;
use common::{analyzer, assert_well_formed, ring_report};
use lockscope::Pid;
use rand::Rng;
use rand::seq::SliceRandom;

#[test]
fn test_random_ring_deadlock() {
    let mut rng = rand::rng();

    for _ in 0..20 {
        // Pick a random ring size between 3 and 8
        let n = rng.random_range(3..=8);

        // Distinct random pids in random order
        let mut pids: Vec<Pid> = (0..n as Pid).map(|i| 1000 + i * 7).collect();
        pids.shuffle(&mut rng);
        let relations: Vec<String> = (0..n).map(|i| format!("t{i}")).collect();

        let report = ring_report(&pids, &relations, "ShareLock");
        let analysis = analyzer()
            .analyze_text(&report)
            .unwrap_or_else(|e| panic!("ring of {n} not analyzed: {e}\n{report}"));
        assert_well_formed(&analysis);

        assert_eq!(
            analysis.cycles.len(),
            1,
            "Expected exactly one cycle, got {:?}",
            analysis.cycles
        );
        let cycle = &analysis.cycles[0];
        assert_eq!(cycle.len(), n, "Expected a cycle of length {n}, got {:?}", cycle.pids);
        assert_eq!(cycle.pids[0], *pids.iter().min().unwrap());
        assert_eq!(cycle.relations.len(), n);

        let expected = (40 + 10 * (n as u32 - 2) + 5 * n as u32).min(100) as u8;
        assert_eq!(cycle.severity, expected);
    }
}

#[test]
fn test_ring_longer_than_bound_reports_shortest_cycle() {
    let pids: Vec<Pid> = (1..=6).collect();
    let relations: Vec<String> = (1..=6).map(|i| format!("r{i}")).collect();
    let report = ring_report(&pids, &relations, "ShareLock");

    let bounded = analyzer().max_cycle_length(5).analyze_text(&report).unwrap();
    assert_well_formed(&bounded);
    assert_eq!(bounded.cycles.len(), 1);
    assert_eq!(bounded.cycles[0].pids, pids);
    assert_eq!(bounded.metadata.warnings.len(), 1);
    let warning = &bounded.metadata.warnings[0];
    assert_eq!(warning.line, 0);
    assert_eq!(warning.pid, Some(1));
    assert!(warning.message.contains("shortest cycle of 6"));

    let unbounded = analyzer().max_cycle_length(6).analyze_text(&report).unwrap();
    assert_eq!(unbounded.cycles[0].len(), 6);
    assert!(unbounded.metadata.warnings.is_empty());
    assert_eq!(unbounded.cycles, bounded.cycles);
}

#[test]
fn test_forty_process_ring_with_default_bound() {
    let pids: Vec<Pid> = (0..40).map(|i| 5000 + i).collect();
    let relations: Vec<String> = (0..40).map(|i| format!("ledger_{i:02}")).collect();
    let report = ring_report(&pids, &relations, "ShareLock");

    let analysis = analyzer().analyze_text(&report).unwrap();
    assert_well_formed(&analysis);
    assert_eq!(analysis.cycles.len(), 1);
    assert_eq!(analysis.cycles[0].len(), 40);
    assert_eq!(analysis.severity, 100);
    assert!(!analysis.metadata.warnings.is_empty());
}
