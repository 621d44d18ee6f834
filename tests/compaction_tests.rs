mod common;

use common::{apply_all, delete, edit, journal_reconciler, key, new_msg};
use mirrorfold::{JournalStore, MessageStore, Reconciler};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_compact_moves_journal_into_archive() {
    let dir = tempdir().unwrap();
    let (store, reconciler) = journal_reconciler(dir.path());
    apply_all(
        &reconciler,
        &[new_msg(1, "a", 1), edit(1, "b", 2), delete(&[1], 3)],
    );
    assert!(store.journal_size().unwrap() > 0);

    store.compact().unwrap();
    assert_eq!(store.journal_size().unwrap(), 0);
    assert!(dir.path().join("archive.jsonl.zst").exists());

    // Reads are unaffected.
    let record = store.get(&key(1)).unwrap().unwrap();
    assert!(record.is_deleted);
    assert_eq!(record.current_text, "b");
}

#[test]
fn test_state_survives_compact_and_reopen() {
    let dir = tempdir().unwrap();
    let expected = {
        let (store, reconciler) = journal_reconciler(dir.path());
        apply_all(&reconciler, &[new_msg(1, "a", 1), edit(1, "b", 2)]);
        store.compact().unwrap();
        apply_all(&reconciler, &[edit(1, "c", 3), new_msg(2, "z", 4)]);
        store.compact().unwrap();
        apply_all(&reconciler, &[delete(&[1, 2, 3], 5)]);
        common::dump(&*store, 4)
    };

    let store = JournalStore::open(dir.path()).unwrap();
    assert_eq!(common::dump(&store, 4), expected);

    let texts: Vec<String> = store
        .history(&key(1))
        .unwrap()
        .into_iter()
        .map(|e| e.text)
        .collect();
    assert_eq!(texts, vec!["b", "c"]);
}

#[test]
fn test_full_replay_reads_every_archive_frame() {
    let dir = tempdir().unwrap();
    {
        let (store, reconciler) = journal_reconciler(dir.path());
        for round in 0..3i64 {
            apply_all(&reconciler, &[new_msg(round, "m", round as u64)]);
            store.compact().unwrap();
        }
        apply_all(&reconciler, &[new_msg(3, "tail", 9)]);
    }
    std::fs::remove_file(dir.path().join("checkpoint.json")).unwrap();

    let store = JournalStore::open(dir.path()).unwrap();
    assert_eq!(store.len(), 4);
}

#[test]
fn test_automatic_compaction() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        JournalStore::builder(dir.path())
            .compact_after_bytes(1024)
            .open()
            .unwrap(),
    );
    let reconciler = Reconciler::new(Arc::clone(&store));

    for id in 0..50 {
        reconciler
            .apply(&new_msg(id, &"x".repeat(40), id as u64))
            .unwrap();
    }
    assert!(store.journal_size().unwrap() < 1024);
    assert!(dir.path().join("archive.jsonl.zst").exists());
    drop(reconciler);
    drop(store);

    let store = JournalStore::open(dir.path()).unwrap();
    assert_eq!(store.len(), 50);
}
