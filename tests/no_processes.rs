mod common;
use common::analyzer;
use lockscope::{AnalyzerError, EventPayload, ParseError};

#[test]
fn test_deadlock_headline_without_process_blocks() {
    let payload = EventPayload::from("ERROR:  deadlock detected\nHINT:  See server log for query details.");

    match analyzer().analyze(&payload) {
        Err(AnalyzerError::Parse(ParseError::NoProcessesFound)) => {}
        other => panic!("expected NoProcessesFound, got {other:?}"),
    }
}

#[test]
fn test_every_block_malformed() {
    let report = "ERROR:  deadlock detected\n\
DETAIL:  Process 1 waits for MysteryLock on relation a; blocked by process 2.\n\
Process 2 waits for OtherLock on relation b; blocked by process 1.\n\
Process 1: UPDATE b SET v = 1\n\
Process 2: UPDATE a SET v = 1";

    match analyzer().analyze_text(report) {
        Err(AnalyzerError::Parse(ParseError::NoValidProcessBlocks { dropped })) => {
            assert_eq!(dropped, 2)
        }
        other => panic!("expected NoValidProcessBlocks, got {other:?}"),
    }
}

#[test]
fn test_unrelated_payload_has_no_signature() {
    let payload = EventPayload::from_json(
        r#"{"message": "duplicate key value violates unique constraint", "exception": {"values": [{"type": "UniqueViolation", "value": "Key (id)=(1) already exists."}]}}"#,
    )
    .unwrap();

    assert!(matches!(
        analyzer().analyze(&payload),
        Err(AnalyzerError::NoDeadlockSignature)
    ));
}
