#![allow(dead_code)]

use mirrorfold::{
    EditHistoryEntry, JournalStore, MemoryStore, MessageKey, MessageRecord, MessageStore,
    MirrorError, Mutation, Reconciler, RemoteEvent, Result, UpdateMode,
};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const CHANNEL: i64 = -100200;

pub fn key(id: i64) -> MessageKey {
    MessageKey::new(CHANNEL, id)
}

pub fn new_msg(id: i64, text: &str, ts: u64) -> RemoteEvent {
    RemoteEvent::new_message(key(id), 77, text, ts)
}

pub fn edit(id: i64, text: &str, ts: u64) -> RemoteEvent {
    RemoteEvent::edited(key(id), text, ts)
}

pub fn delete(ids: &[i64], ts: u64) -> RemoteEvent {
    RemoteEvent::deleted(CHANNEL, ids, ts)
}

pub fn memory_reconciler() -> (Arc<MemoryStore>, Reconciler<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(Arc::clone(&store));
    (store, reconciler)
}

pub fn journal_reconciler(dir: &Path) -> (Arc<JournalStore>, Reconciler<JournalStore>) {
    let store = Arc::new(JournalStore::open(dir).unwrap());
    let reconciler = Reconciler::new(Arc::clone(&store));
    (store, reconciler)
}

pub fn apply_all<S: MessageStore>(reconciler: &Reconciler<S>, events: &[RemoteEvent]) {
    for event in events {
        reconciler.apply(event).unwrap();
    }
}

/// All records and stored history for ids `0..n` of [`CHANNEL`].
pub fn dump<S: MessageStore>(
    store: &S,
    n: i64,
) -> Vec<(Option<MessageRecord>, Vec<EditHistoryEntry>)> {
    (0..n)
        .map(|id| {
            let k = key(id);
            (store.get(&k).unwrap(), store.history(&k).unwrap())
        })
        .collect()
}

/// A store whose writes can be switched to fail, standing in for a disk
/// that went away.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(MirrorError::StorageUnavailable(io::Error::other("disk gone")))
        } else {
            Ok(())
        }
    }
}

impl MessageStore for FlakyStore {
    fn update<F>(&self, key: MessageKey, mode: UpdateMode, mutator: F) -> Result<bool>
    where
        F: FnOnce(Option<&MessageRecord>, &[EditHistoryEntry]) -> Option<Mutation>,
    {
        self.check()?;
        self.inner.update(key, mode, mutator)
    }

    fn get(&self, key: &MessageKey) -> Result<Option<MessageRecord>> {
        self.check()?;
        self.inner.get(key)
    }

    fn get_with_history(
        &self,
        key: &MessageKey,
    ) -> Result<(Option<MessageRecord>, Vec<EditHistoryEntry>)> {
        self.check()?;
        self.inner.get_with_history(key)
    }

    fn query_deleted(&self, channel_id: i64) -> Result<Vec<MessageRecord>> {
        self.check()?;
        self.inner.query_deleted(channel_id)
    }

    fn query_edited(&self, channel_id: i64) -> Result<Vec<MessageRecord>> {
        self.check()?;
        self.inner.query_edited(channel_id)
    }

    fn history(&self, key: &MessageKey) -> Result<Vec<EditHistoryEntry>> {
        self.check()?;
        self.inner.history(key)
    }

    fn append_history(&self, entry: EditHistoryEntry) -> Result<()> {
        self.check()?;
        self.inner.append_history(entry)
    }
}
