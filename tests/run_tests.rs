mod common;

use common::{CHANNEL, FlakyStore, delete, edit, key, memory_reconciler, new_msg};
use mirrorfold::{
    Delivery, EventSource, JsonLinesSource, MemorySource, MessageStore, MirrorError, Reconciler,
    Result, Shutdown, StopReason,
};
use std::io::Cursor;
use std::sync::Arc;

#[test]
fn test_run_acks_every_applied_delivery() {
    let (store, reconciler) = memory_reconciler();
    let mut source = MemorySource::from_events([
        new_msg(1, "a", 1),
        edit(1, "b", 2),
        delete(&[1, 2], 3),
        new_msg(1, "a", 1),
    ]);

    let report = reconciler.run(&mut source, &Shutdown::new()).unwrap();
    assert_eq!(report.stopped, StopReason::Exhausted);
    assert_eq!(report.delivered, 4);
    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 2);
    assert_eq!(report.tombstoned, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(source.acked(), &[0, 1, 2, 3]);
    assert_eq!(source.unacked(), 0);

    assert!(store.get(&key(1)).unwrap().unwrap().is_deleted);
}

#[test]
fn test_storage_failure_leaves_delivery_unacked() {
    let store = Arc::new(FlakyStore::default());
    let reconciler = Reconciler::new(Arc::clone(&store));
    let mut source = MemorySource::from_events([new_msg(1, "a", 1), delete(&[1], 2)]);

    store.set_failing(true);
    let err = reconciler.run(&mut source, &Shutdown::new()).unwrap_err();
    assert!(matches!(err, MirrorError::StorageUnavailable(_)));
    assert!(err.is_transient());
    assert!(source.acked().is_empty());
    assert_eq!(source.unacked(), 1);

    // The source redelivers; once storage is back everything lands.
    store.set_failing(false);
    assert_eq!(source.requeue_unacked(), 1);
    let report = reconciler.run(&mut source, &Shutdown::new()).unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(source.acked(), &[0, 1]);

    let record = store.inner.get(&key(1)).unwrap().unwrap();
    assert_eq!(record.original_text, "a");
    assert!(record.is_deleted);
}

#[test]
fn test_redelivery_after_partial_apply_is_harmless() {
    let (store, reconciler) = memory_reconciler();
    let mut source = MemorySource::from_events([delete(&[1, 2, 3], 5)]);

    // Pretend key 1 landed before a crash that lost the ack.
    reconciler.apply(&delete(&[1], 5)).unwrap();
    let report = reconciler.run(&mut source, &Shutdown::new()).unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.tombstoned, 2);
    assert_eq!(store.query_deleted(CHANNEL).unwrap().len(), 3);
}

#[test]
fn test_shutdown_stops_between_deliveries() {
    let (store, reconciler) = memory_reconciler();
    let mut source = MemorySource::from_events([new_msg(1, "a", 1), new_msg(2, "b", 2)]);

    let shutdown = Shutdown::new();
    shutdown.trigger();
    let report = reconciler.run(&mut source, &shutdown).unwrap();
    assert_eq!(report.stopped, StopReason::Shutdown);
    assert_eq!(report.delivered, 0);
    assert_eq!(source.pending(), 2);
    assert!(store.is_empty());
}

/// Triggers shutdown from inside the source after a fixed number of
/// deliveries.
struct StopAfter {
    inner: MemorySource,
    remaining: usize,
    shutdown: Shutdown,
}

impl EventSource for StopAfter {
    fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        if self.remaining == 0 {
            self.shutdown.trigger();
        } else {
            self.remaining -= 1;
        }
        self.inner.next_delivery()
    }

    fn ack(&mut self, tag: u64) -> Result<()> {
        self.inner.ack(tag)
    }
}

#[test]
fn test_delivery_in_progress_completes_before_shutdown() {
    let (store, reconciler) = memory_reconciler();
    let shutdown = Shutdown::new();
    let mut source = StopAfter {
        inner: MemorySource::from_events((0..5).map(|id| new_msg(id, "m", 1))),
        remaining: 2,
        shutdown: shutdown.clone(),
    };

    let report = reconciler.run(&mut source, &shutdown).unwrap();
    assert_eq!(report.stopped, StopReason::Shutdown);
    assert_eq!(report.delivered, 3);
    assert_eq!(source.inner.acked(), &[0, 1, 2]);
    assert_eq!(store.len(), 3);
}

#[test]
fn test_unknown_ack_is_a_source_error() {
    let mut source = MemorySource::new();
    source.push(new_msg(1, "a", 1));
    let err = source.ack(0).unwrap_err();
    assert!(matches!(err, MirrorError::Source(_)));
}

#[test]
fn test_json_lines_source() {
    let capture = [
        r#"{"type":"new_message","channel_id":-100200,"message_id":1,"sender_id":7,"text":"hi","timestamp":10}"#,
        "",
        r#"{"type":"message_edited","channel_id":-100200,"message_id":1,"text":"hi!","timestamp":11}"#,
        r#"{"type":"messages_deleted","channel_id":-100200,"message_ids":[1,2],"timestamp":12}"#,
    ]
    .join("\n");

    let (store, reconciler) = memory_reconciler();
    let mut source = JsonLinesSource::new(Cursor::new(capture));
    let report = reconciler.run(&mut source, &Shutdown::new()).unwrap();

    assert_eq!(report.delivered, 3);
    assert_eq!(source.last_acked(), Some(4));

    let record = store.get(&key(1)).unwrap().unwrap();
    assert_eq!(record.sender_id, 7);
    assert_eq!(record.original_text, "hi");
    assert_eq!(record.current_text, "hi!");
    assert!(record.is_deleted);
    assert!(store.get(&key(2)).unwrap().unwrap().is_tombstone());
}

#[test]
fn test_json_lines_source_rejects_bad_line() {
    let (_, reconciler) = memory_reconciler();
    let mut source = JsonLinesSource::new(Cursor::new("{\"type\":\"bogus\"}\n"));

    let err = reconciler.run(&mut source, &Shutdown::new()).unwrap_err();
    match err {
        MirrorError::Source(e) => assert!(e.to_string().starts_with("line 1:")),
        other => panic!("unexpected error: {other}"),
    }
}
