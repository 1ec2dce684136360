use dialhub::dead_letter::{DeadLetterBuffer, DeadLetterKind};
use dialhub::types::FormParams;
use std::fs;
use tempfile::tempdir;

fn sample_payload() -> FormParams {
    let mut params = FormParams::new();
    params.insert("MessageSid".to_string(), "SM900".to_string());
    params.insert("From".to_string(), "+61400000001".to_string());
    params.insert("To".to_string(), "+61255501234".to_string());
    params.insert("Body".to_string(), "hello".to_string());
    params
}

#[test]
fn test_append_then_read_roundtrip() {
    let dir = tempdir().unwrap();
    let buffer = DeadLetterBuffer::new(dir.path().join("dead-letter.jsonl"));

    buffer.append(DeadLetterKind::Sms, &sample_payload(), "pool timed out");
    buffer.append(DeadLetterKind::Voice, &sample_payload(), "pool timed out");

    let entries = buffer.read_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].kind, DeadLetterKind::Sms);
    assert_eq!(entries[1].kind, DeadLetterKind::Voice);
    assert_eq!(entries[0].error, "pool timed out");
    assert_eq!(
        entries[0].raw_payload.get("MessageSid").map(String::as_str),
        Some("SM900")
    );
}

#[test]
fn test_read_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let buffer = DeadLetterBuffer::new(dir.path().join("nope.jsonl"));
    assert!(buffer.read_entries().is_empty());
}

#[test]
fn test_corrupt_lines_are_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dead-letter.jsonl");
    let buffer = DeadLetterBuffer::new(path.clone());

    buffer.append(DeadLetterKind::Sms, &sample_payload(), "boom");
    fs::write(
        &path,
        format!("{}not json\n\n", fs::read_to_string(&path).unwrap()),
    )
    .unwrap();
    buffer.append(DeadLetterKind::Sms, &sample_payload(), "boom again");

    let entries = buffer.read_entries();
    assert_eq!(entries.len(), 2);
}

#[test]
fn test_archive_renames_and_clears() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dead-letter.jsonl");
    let buffer = DeadLetterBuffer::new(path.clone());

    buffer.append(DeadLetterKind::Sms, &sample_payload(), "boom");
    let archived = buffer.archive().unwrap().expect("archive path");

    assert!(!path.exists());
    assert!(archived.exists());
    assert!(archived
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with(".archived"));
    assert!(buffer.read_entries().is_empty());
}

#[test]
fn test_archive_without_file_is_none() {
    let dir = tempdir().unwrap();
    let buffer = DeadLetterBuffer::new(dir.path().join("dead-letter.jsonl"));
    assert!(buffer.archive().unwrap().is_none());
}

#[test]
fn test_archived_snapshot_still_readable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dead-letter.jsonl");
    let buffer = DeadLetterBuffer::new(path.clone());

    buffer.append(DeadLetterKind::Sms, &sample_payload(), "boom");
    let archived = buffer.archive().unwrap().expect("archive path");

    // The consumer reads the snapshot; a failure appended afterwards goes
    // to a fresh live file and is not part of the snapshot.
    buffer.append(DeadLetterKind::Voice, &sample_payload(), "late failure");

    let snapshot = DeadLetterBuffer::read_entries_from(&archived);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].kind, DeadLetterKind::Sms);

    let live = buffer.read_entries();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].kind, DeadLetterKind::Voice);
}

#[test]
fn test_append_survives_missing_parent_dir() {
    // append never propagates IO errors to the ingestion path
    let dir = tempdir().unwrap();
    let buffer = DeadLetterBuffer::new(dir.path().join("deep/never/made.jsonl"));
    buffer.append(DeadLetterKind::Sms, &sample_payload(), "boom");
}
