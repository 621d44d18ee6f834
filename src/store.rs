use crate::error::{MirrorError, Result};
use crate::journal::Commit;
use crate::locks::KeyLocks;
use crate::record::{ChannelId, EditHistoryEntry, MessageKey, MessageRecord, Mutation};
use crate::state::Tables;
use parking_lot::RwLock;

/// Whether [`MessageStore::update`] may create a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// The mutator sees `None` when no record exists and may create one.
    Upsert,
    /// Fail with [`MirrorError::NotFound`] when no record exists.
    MustExist,
}

/// Keyed storage for message records and their edit history.
///
/// Operations on the same key are mutually exclusive; operations on
/// different keys may run concurrently. Readers always observe a whole
/// record as it was before or after a write, never a mix.
pub trait MessageStore: Send + Sync {
    /// Read-modify-write one key under its lock.
    ///
    /// The mutator receives the current record (if any) and the key's stored
    /// edit history, and returns the mutation to commit. Returning `None`
    /// commits nothing. Returns whether a commit was written.
    ///
    /// # Errors
    ///
    /// [`MirrorError::NotFound`] in [`UpdateMode::MustExist`] when the key
    /// has no record, [`MirrorError::OutOfSequence`] when the mutation's
    /// history entry does not follow the stored tail, and
    /// [`MirrorError::StorageUnavailable`] when the write did not become
    /// durable. In every error case nothing was applied.
    fn update<F>(&self, key: MessageKey, mode: UpdateMode, mutator: F) -> Result<bool>
    where
        F: FnOnce(Option<&MessageRecord>, &[EditHistoryEntry]) -> Option<Mutation>;

    fn get(&self, key: &MessageKey) -> Result<Option<MessageRecord>>;

    /// The record and its stored edit history, read as one consistent view.
    fn get_with_history(
        &self,
        key: &MessageKey,
    ) -> Result<(Option<MessageRecord>, Vec<EditHistoryEntry>)>;

    /// Deleted records of a channel, newest `created_at` first.
    fn query_deleted(&self, channel_id: ChannelId) -> Result<Vec<MessageRecord>>;

    /// Edited records of a channel, newest `created_at` first.
    fn query_edited(&self, channel_id: ChannelId) -> Result<Vec<MessageRecord>>;

    /// Stored edit entries for a key, oldest first.
    fn history(&self, key: &MessageKey) -> Result<Vec<EditHistoryEntry>>;

    /// Append one edit entry. Its sequence must exceed every sequence
    /// already stored for the key; prior entries are never touched.
    fn append_history(&self, entry: EditHistoryEntry) -> Result<()>;

    /// Insert or fully replace a record. Writing an identical record is a
    /// no-op. Returns whether a commit was written.
    fn put(&self, record: MessageRecord) -> Result<bool> {
        self.update(record.key(), UpdateMode::Upsert, |current, _| {
            if current == Some(&record) {
                None
            } else {
                Some(Mutation::record(record))
            }
        })
    }
}

/// Locks and tables shared by every store implementation.
#[derive(Default)]
pub(crate) struct Core {
    locks: KeyLocks,
    pub tables: RwLock<Tables>,
}

impl Core {
    pub fn with_tables(tables: Tables) -> Self {
        Core {
            locks: KeyLocks::default(),
            tables: RwLock::new(tables),
        }
    }

    /// Run a mutator under the key's lock and hand the resulting commit to
    /// `write`, which must make it durable and fold it into the tables.
    pub fn update<F, W>(&self, key: MessageKey, mode: UpdateMode, mutator: F, write: W) -> Result<bool>
    where
        F: FnOnce(Option<&MessageRecord>, &[EditHistoryEntry]) -> Option<Mutation>,
        W: FnOnce(&Commit) -> Result<()>,
    {
        let _guard = self.locks.lock(&key);

        let (current, history, last_sequence) = {
            let tables = self.tables.read();
            (
                tables.get(&key).cloned(),
                tables.history(&key).to_vec(),
                tables.last_sequence(&key),
            )
        };

        if mode == UpdateMode::MustExist && current.is_none() {
            return Err(MirrorError::NotFound(key));
        }

        let Some(mut mutation) = mutator(current.as_ref(), &history) else {
            return Ok(false);
        };

        mutation.record.channel_id = key.channel_id;
        mutation.record.message_id = key.message_id;

        let mut entries = Vec::new();
        if let Some(mut entry) = mutation.history {
            entry.channel_id = key.channel_id;
            entry.message_id = key.message_id;
            if entry.sequence <= last_sequence {
                return Err(MirrorError::OutOfSequence {
                    key,
                    sequence: entry.sequence,
                    last: last_sequence,
                });
            }
            mutation.record.last_sequence = mutation.record.last_sequence.max(entry.sequence);
            entries.push(entry);
        }

        if entries.is_empty() && current.as_ref() == Some(&mutation.record) {
            return Ok(false);
        }

        write(&Commit::new(key, Some(mutation.record), entries))?;
        Ok(true)
    }

    pub fn append_history<W>(&self, entry: EditHistoryEntry, write: W) -> Result<()>
    where
        W: FnOnce(&Commit) -> Result<()>,
    {
        let key = entry.key();
        let _guard = self.locks.lock(&key);

        let last = self.tables.read().last_sequence(&key);
        if entry.sequence <= last {
            return Err(MirrorError::OutOfSequence {
                key,
                sequence: entry.sequence,
                last,
            });
        }

        write(&Commit::new(key, None, vec![entry]))
    }

    pub fn get(&self, key: &MessageKey) -> Option<MessageRecord> {
        self.tables.read().get(key).cloned()
    }

    pub fn history(&self, key: &MessageKey) -> Vec<EditHistoryEntry> {
        self.tables.read().history(key).to_vec()
    }

    pub fn get_with_history(
        &self,
        key: &MessageKey,
    ) -> (Option<MessageRecord>, Vec<EditHistoryEntry>) {
        let tables = self.tables.read();
        (tables.get(key).cloned(), tables.history(key).to_vec())
    }

    pub fn select(
        &self,
        channel_id: ChannelId,
        filter: impl Fn(&MessageRecord) -> bool,
    ) -> Vec<MessageRecord> {
        self.tables.read().select(channel_id, filter)
    }
}

/// A volatile [`MessageStore`]. Same semantics as
/// [`JournalStore`](crate::JournalStore) minus durability.
#[derive(Default)]
pub struct MemoryStore {
    core: Core,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.core.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fold(&self, commit: &Commit) -> Result<()> {
        self.core.tables.write().fold(commit);
        Ok(())
    }
}

impl MessageStore for MemoryStore {
    fn update<F>(&self, key: MessageKey, mode: UpdateMode, mutator: F) -> Result<bool>
    where
        F: FnOnce(Option<&MessageRecord>, &[EditHistoryEntry]) -> Option<Mutation>,
    {
        self.core.update(key, mode, mutator, |commit| self.fold(commit))
    }

    fn get(&self, key: &MessageKey) -> Result<Option<MessageRecord>> {
        Ok(self.core.get(key))
    }

    fn get_with_history(
        &self,
        key: &MessageKey,
    ) -> Result<(Option<MessageRecord>, Vec<EditHistoryEntry>)> {
        Ok(self.core.get_with_history(key))
    }

    fn query_deleted(&self, channel_id: ChannelId) -> Result<Vec<MessageRecord>> {
        Ok(self.core.select(channel_id, |r| r.is_deleted))
    }

    fn query_edited(&self, channel_id: ChannelId) -> Result<Vec<MessageRecord>> {
        Ok(self.core.select(channel_id, |r| r.is_edited))
    }

    fn history(&self, key: &MessageKey) -> Result<Vec<EditHistoryEntry>> {
        Ok(self.core.history(key))
    }

    fn append_history(&self, entry: EditHistoryEntry) -> Result<()> {
        self.core.append_history(entry, |commit| self.fold(commit))
    }
}
