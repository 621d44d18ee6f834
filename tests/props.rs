mod common;

use common::{apply_all, delete, edit, journal_reconciler, key, memory_reconciler, new_msg};
use mirrorfold::{JournalStore, MessageStore, RemoteEvent};
use proptest::prelude::*;
use std::collections::HashSet;
use tempfile::tempdir;

const KEYS: i64 = 5;

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("c".to_string()),
        "[a-z ]{0,12}",
    ]
}

fn arb_event() -> impl Strategy<Value = RemoteEvent> {
    let id = 0..KEYS;
    let ts = 0..20u64;
    prop_oneof![
        (id.clone(), arb_text(), ts.clone()).prop_map(|(id, text, ts)| new_msg(id, &text, ts)),
        (id.clone(), arb_text(), ts.clone()).prop_map(|(id, text, ts)| edit(id, &text, ts)),
        (proptest::collection::vec(id, 1..4), ts).prop_map(|(ids, ts)| delete(&ids, ts)),
    ]
}

fn arb_event_sequence() -> impl Strategy<Value = Vec<RemoteEvent>> {
    proptest::collection::vec(arb_event(), 0..40)
}

// The original text is whatever the first NewMessage for a key carried, no
// matter what edits or deletions came before or after it.
proptest! {
    #[test]
    fn prop_original_text_is_first_observation(events in arb_event_sequence()) {
        let (store, reconciler) = memory_reconciler();
        apply_all(&reconciler, &events);

        for id in 0..KEYS {
            let touched = events.iter().any(|e| e.keys().contains(&key(id)));
            let record = store.get(&key(id)).unwrap();
            prop_assert_eq!(record.is_some(), touched);

            let Some(record) = record else { continue };
            let first = events.iter().find_map(|e| match e {
                RemoteEvent::NewMessage { message_id, text, .. } if *message_id == id => {
                    Some(text.clone())
                }
                _ => None,
            });
            prop_assert_eq!(record.original_text, first.unwrap_or_default());
        }
    }
}

// Once a deletion was applied to a key it stays deleted, and only keys that
// received a deletion are ever deleted.
proptest! {
    #[test]
    fn prop_deletion_is_sticky(events in arb_event_sequence()) {
        let (store, reconciler) = memory_reconciler();
        let mut deleted = HashSet::new();

        for event in &events {
            reconciler.apply(event).unwrap();
            if let RemoteEvent::MessagesDeleted { .. } = event {
                deleted.extend(event.keys());
            }
            for id in 0..KEYS {
                let is_deleted = store
                    .get(&key(id))
                    .unwrap()
                    .is_some_and(|r| r.is_deleted);
                prop_assert_eq!(is_deleted, deleted.contains(&key(id)));
            }
        }
    }
}

// Delivering every event twice in a row ends in the same state as
// delivering it once.
proptest! {
    #[test]
    fn prop_redelivery_is_idempotent(events in arb_event_sequence()) {
        let (once, reconciler) = memory_reconciler();
        apply_all(&reconciler, &events);

        let doubled: Vec<RemoteEvent> = events
            .iter()
            .flat_map(|e| [e.clone(), e.clone()])
            .collect();
        let (twice, reconciler) = memory_reconciler();
        apply_all(&reconciler, &doubled);

        prop_assert_eq!(common::dump(&*once, KEYS), common::dump(&*twice, KEYS));
    }
}

// History sequences are strictly increasing for every key.
proptest! {
    #[test]
    fn prop_history_sequences_increase(events in arb_event_sequence()) {
        let (store, reconciler) = memory_reconciler();
        apply_all(&reconciler, &events);

        for id in 0..KEYS {
            let history = store.history(&key(id)).unwrap();
            prop_assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));
            if let Some(record) = store.get(&key(id)).unwrap() {
                prop_assert_eq!(record.last_sequence, history.last().map_or(0, |e| e.sequence));
            }
        }
    }
}

// Parallel batch application matches applying one event at a time.
proptest! {
    #[test]
    fn prop_batch_matches_sequential(events in arb_event_sequence()) {
        let (sequential, reconciler) = memory_reconciler();
        apply_all(&reconciler, &events);

        let (batched, reconciler) = memory_reconciler();
        reconciler.apply_batch(&events).unwrap();

        prop_assert_eq!(common::dump(&*sequential, KEYS), common::dump(&*batched, KEYS));
    }
}

// A journal store reopened from disk holds exactly what a memory store
// holds after the same events, with or without compaction in between.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_journal_reopen_matches_memory(
        events in arb_event_sequence(),
        compact_at in proptest::option::of(0..40usize),
    ) {
        let (memory, reconciler) = memory_reconciler();
        apply_all(&reconciler, &events);

        let dir = tempdir().unwrap();
        {
            let (journal, reconciler) = journal_reconciler(dir.path());
            for (i, event) in events.iter().enumerate() {
                if compact_at == Some(i) {
                    journal.compact().unwrap();
                }
                reconciler.apply(event).unwrap();
            }
        }

        let reopened = JournalStore::open(dir.path()).unwrap();
        prop_assert_eq!(common::dump(&*memory, KEYS), common::dump(&reopened, KEYS));
    }
}
