use crate::error::Result;
use crate::journal::{Commit, Journal, LockMode};
use crate::record::{ChannelId, EditHistoryEntry, MessageKey, MessageRecord, Mutation};
use crate::snapshot::{self, CHECKPOINT_FILE, Checkpoint};
use crate::state;
use crate::store::{Core, MessageStore, UpdateMode};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

const DEFAULT_CHECKPOINT_EVERY: u64 = 256;

/// A durable [`MessageStore`] backed by an append-only journal.
///
/// Every successful write is synced to disk before it returns and before it
/// becomes visible to readers. State survives a crash at any point: on open
/// the latest valid checkpoint is loaded and the journal tail folded on top.
///
/// # Examples
///
/// ```
/// use mirrorfold::{JournalStore, MessageKey, MessageRecord, MessageStore};
///
/// let dir = tempfile::tempdir().unwrap();
/// let key = MessageKey::new(1, 10);
/// {
///     let store = JournalStore::open(dir.path()).unwrap();
///     store.put(MessageRecord::observed(key, 7, "hi", 100)).unwrap();
/// }
/// let store = JournalStore::open(dir.path()).unwrap();
/// assert_eq!(store.get(&key).unwrap().unwrap().original_text, "hi");
/// ```
pub struct JournalStore {
    dir: PathBuf,
    checkpoint_path: PathBuf,
    core: Core,
    writer: Mutex<Writer>,
    checkpoint_every: u64,
    compact_after_bytes: Option<u64>,
}

struct Writer {
    journal: Journal,
    offset: u64,
    hash: String,
    since_checkpoint: u64,
}

/// Configures and opens a [`JournalStore`].
#[derive(Debug, Clone)]
pub struct JournalStoreBuilder {
    dir: PathBuf,
    lock_mode: LockMode,
    checkpoint_every: u64,
    compact_after_bytes: Option<u64>,
}

impl JournalStoreBuilder {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        JournalStoreBuilder {
            dir: dir.as_ref().to_path_buf(),
            lock_mode: LockMode::default(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            compact_after_bytes: None,
        }
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Write a checkpoint after this many commits. 0 disables automatic
    /// checkpoints.
    pub fn checkpoint_every(mut self, commits: u64) -> Self {
        self.checkpoint_every = commits;
        self
    }

    /// Compact once the active journal reaches this many bytes.
    pub fn compact_after_bytes(mut self, bytes: u64) -> Self {
        self.compact_after_bytes = Some(bytes);
        self
    }

    /// Open the store, creating the directory if needed and recovering
    /// state from the checkpoint and journal.
    ///
    /// # Errors
    ///
    /// Fails with [`MirrorError::StorageUnavailable`](crate::MirrorError)
    /// if the directory cannot be created, another writer holds the lock
    /// (`io::ErrorKind::AlreadyExists`), or a complete journal line is
    /// corrupt.
    pub fn open(self) -> Result<JournalStore> {
        let mut journal = Journal::open(&self.dir, self.lock_mode)?;
        let cut = journal.repair_tail()?;
        if cut > 0 {
            log::warn!(
                "mirrorfold: dropped {cut} bytes of a partial commit at the end of {}",
                journal.path().display()
            );
        }

        let checkpoint_path = self.dir.join(CHECKPOINT_FILE);
        let recovered = state::recover(&journal, &checkpoint_path)?;
        log::info!(
            "mirrorfold: opened {} ({} records, {} commits replayed)",
            self.dir.display(),
            recovered.tables.len(),
            recovered.replayed
        );

        Ok(JournalStore {
            dir: self.dir,
            checkpoint_path,
            core: Core::with_tables(recovered.tables),
            writer: Mutex::new(Writer {
                journal,
                offset: recovered.offset,
                hash: recovered.hash,
                since_checkpoint: recovered.replayed as u64,
            }),
            checkpoint_every: self.checkpoint_every,
            compact_after_bytes: self.compact_after_bytes,
        })
    }
}

impl JournalStore {
    /// Open with default settings.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        JournalStoreBuilder::new(dir).open()
    }

    pub fn builder(dir: impl AsRef<Path>) -> JournalStoreBuilder {
        JournalStoreBuilder::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.core.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes of the active (uncompacted) journal.
    pub fn journal_size(&self) -> Result<u64> {
        Ok(self.writer.lock().journal.size()?)
    }

    /// Persist the current tables so the next open only folds newer commits.
    pub fn checkpoint(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.checkpoint_locked(&mut writer)
    }

    /// Move the active journal into the compressed archive.
    ///
    /// Order matters for crash safety: the archive frame is written first,
    /// then a checkpoint of the full state at offset 0, then the journal is
    /// truncated. A crash between any two steps reopens to the same state
    /// because folding a commit twice is a no-op.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.compact_locked(&mut writer)
    }

    fn checkpoint_locked(&self, writer: &mut Writer) -> Result<()> {
        let image = self.core.tables.read().to_image();
        snapshot::save(
            &self.checkpoint_path,
            &Checkpoint::new(image, writer.offset, writer.hash.clone()),
        )?;
        writer.since_checkpoint = 0;
        Ok(())
    }

    fn compact_locked(&self, writer: &mut Writer) -> Result<()> {
        let archived = writer.journal.archive_active()?;
        writer.offset = 0;
        writer.hash.clear();
        self.checkpoint_locked(writer)?;
        writer.journal.truncate()?;
        log::info!(
            "mirrorfold: compacted {archived} journal bytes into {}",
            writer.journal.archive_path().display()
        );
        Ok(())
    }

    /// Make a commit durable, then fold it into the tables. Both happen under
    /// the writer lock so a checkpoint never sees one without the other.
    fn write(&self, commit: &Commit) -> Result<()> {
        let mut writer = self.writer.lock();
        let appended = writer.journal.append(commit)?;
        self.core.tables.write().fold(commit);

        writer.offset = appended.end_offset;
        writer.hash = appended.line_hash;
        writer.since_checkpoint += 1;

        // The commit is already durable; housekeeping failures only cost
        // replay time on the next open.
        let housekeeping = match self.compact_after_bytes {
            Some(limit) if writer.offset >= limit => self.compact_locked(&mut writer),
            _ if self.checkpoint_every > 0 && writer.since_checkpoint >= self.checkpoint_every => {
                self.checkpoint_locked(&mut writer)
            }
            _ => Ok(()),
        };
        if let Err(e) = housekeeping {
            log::warn!("mirrorfold: housekeeping after commit failed: {e}");
        }
        Ok(())
    }
}

impl MessageStore for JournalStore {
    fn update<F>(&self, key: MessageKey, mode: UpdateMode, mutator: F) -> Result<bool>
    where
        F: FnOnce(Option<&MessageRecord>, &[EditHistoryEntry]) -> Option<Mutation>,
    {
        self.core.update(key, mode, mutator, |commit| self.write(commit))
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
        self.core.append_history(entry, |commit| self.write(commit))
    }
}
