use crate::journal::{Commit, Journal};
use crate::record::{ChannelId, EditHistoryEntry, MessageKey, MessageRecord};
use crate::snapshot::{self, Checkpoint, TableImage};
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// The two logical tables: Messages and EditHistory.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    messages: HashMap<MessageKey, MessageRecord>,
    history: HashMap<MessageKey, Vec<EditHistoryEntry>>,
}

impl Tables {
    pub fn get(&self, key: &MessageKey) -> Option<&MessageRecord> {
        self.messages.get(key)
    }

    pub fn history(&self, key: &MessageKey) -> &[EditHistoryEntry] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest sequence known for `key`, from either table.
    pub fn last_sequence(&self, key: &MessageKey) -> u64 {
        let stored = self.history(key).last().map_or(0, |e| e.sequence);
        let recorded = self.get(key).map_or(0, |r| r.last_sequence);
        stored.max(recorded)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Fold one commit into the tables.
    ///
    /// Idempotent: a record is replaced wholesale and a history entry whose
    /// sequence is not past the stored tail is ignored, so replaying a commit
    /// twice leaves the tables unchanged.
    pub fn fold(&mut self, commit: &Commit) {
        if let Some(record) = &commit.record {
            self.messages.insert(commit.key, record.clone());
        }
        for entry in &commit.history {
            let trail = self.history.entry(commit.key).or_default();
            if trail.last().is_none_or(|last| entry.sequence > last.sequence) {
                trail.push(entry.clone());
            }
            if let Some(record) = self.messages.get_mut(&commit.key) {
                record.last_sequence = record.last_sequence.max(entry.sequence);
            }
        }
    }

    /// Records in `channel_id` matching `filter`, newest `created_at` first.
    pub fn select(
        &self,
        channel_id: ChannelId,
        filter: impl Fn(&MessageRecord) -> bool,
    ) -> Vec<MessageRecord> {
        let mut records: Vec<MessageRecord> = self
            .messages
            .values()
            .filter(|r| r.channel_id == channel_id && filter(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.message_id.cmp(&a.message_id))
        });
        records
    }

    pub fn to_image(&self) -> TableImage {
        let mut messages: Vec<MessageRecord> = self.messages.values().cloned().collect();
        messages.sort_by_key(MessageRecord::key);
        let mut keys: Vec<&MessageKey> = self.history.keys().collect();
        keys.sort();
        let history = keys
            .into_iter()
            .flat_map(|k| self.history[k].iter().cloned())
            .collect();
        TableImage { messages, history }
    }

    pub fn from_image(image: TableImage) -> Self {
        let mut tables = Tables::default();
        for record in image.messages {
            tables.messages.insert(record.key(), record);
        }
        for entry in image.history {
            tables.history.entry(entry.key()).or_default().push(entry);
        }
        for trail in tables.history.values_mut() {
            trail.sort_by_key(|e| e.sequence);
            trail.dedup_by_key(|e| e.sequence);
        }
        tables
    }
}

/// Tables rebuilt on open, with the journal position they reflect.
pub(crate) struct Recovered {
    pub tables: Tables,
    pub offset: u64,
    pub hash: String,
    pub replayed: usize,
}

/// Rebuild the tables from the checkpoint and journal. Expects a journal
/// whose torn tail, if any, was already cut by [`Journal::repair_tail`].
///
/// A checkpoint that no longer lines up with the journal (offset past EOF,
/// or the line before its offset hashes differently) is discarded and the
/// archive plus active journal are replayed in full.
pub(crate) fn recover(journal: &Journal, checkpoint_path: &Path) -> io::Result<Recovered> {
    let mut recovered = Recovered {
        tables: Tables::default(),
        offset: 0,
        hash: String::new(),
        replayed: 0,
    };

    let mut full_replay = true;
    if let Some(checkpoint) = snapshot::load(checkpoint_path)? {
        match verify(journal, &checkpoint)? {
            Validity::Valid => {
                recovered.tables = Tables::from_image(checkpoint.state);
                recovered.offset = checkpoint.offset;
                recovered.hash = checkpoint.hash;
                full_replay = false;
            }
            Validity::OffsetBeyondEof => log::warn!(
                "mirrorfold: checkpoint offset {} is beyond journal EOF, rebuilding",
                checkpoint.offset
            ),
            Validity::HashMismatch => {
                log::warn!("mirrorfold: checkpoint hash mismatch, rebuilding")
            }
        }
    }

    if full_replay {
        for result in journal.read_full()? {
            let (commit, _) = result?;
            recovered.tables.fold(&commit);
            recovered.replayed += 1;
        }
        recovered.offset = journal.size()?;
        recovered.hash = journal
            .read_line_hash_before(recovered.offset)?
            .unwrap_or_default();
    } else {
        for result in journal.read_from(recovered.offset)? {
            let (commit, next_offset, line_hash) = result?;
            recovered.tables.fold(&commit);
            recovered.offset = next_offset;
            recovered.hash = line_hash;
            recovered.replayed += 1;
        }
    }

    Ok(recovered)
}

enum Validity {
    Valid,
    OffsetBeyondEof,
    HashMismatch,
}

fn verify(journal: &Journal, checkpoint: &Checkpoint) -> io::Result<Validity> {
    if checkpoint.offset > journal.size()? {
        return Ok(Validity::OffsetBeyondEof);
    }

    match journal.read_line_hash_before(checkpoint.offset)? {
        Some(hash) if hash != checkpoint.hash => Ok(Validity::HashMismatch),
        _ => Ok(Validity::Valid),
    }
}
