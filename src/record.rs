use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote channel (chat) identifier.
pub type ChannelId = i64;

/// Remote message identifier, unique within its channel.
pub type MessageId = i64;

/// Composite identity of a mirrored message.
///
/// # Examples
///
/// ```
/// use mirrorfold::MessageKey;
///
/// let key = MessageKey::new(-1001, 42);
/// assert_eq!(key.to_string(), "-1001/42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageKey {
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        MessageKey {
            channel_id,
            message_id,
        }
    }

    /// Stable 64-bit hash of the key, used for lock striping and sharding.
    pub fn stable_hash(&self) -> u64 {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.channel_id.to_le_bytes());
        bytes[8..].copy_from_slice(&self.message_id.to_le_bytes());
        xxhash_rust::xxh64::xxh64(&bytes, 0)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// Last-known state of one remote message.
///
/// Records are never removed. A remote deletion only sets `is_deleted`,
/// which is what keeps the content readable after the remote side drops it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub sender_id: i64,
    /// Text after the most recent edit observed before deletion.
    pub current_text: String,
    /// Text as first observed. Written once.
    pub original_text: String,
    pub created_at: u64,
    pub is_deleted: bool,
    pub is_edited: bool,
    pub last_modified_at: u64,

    /// `false` while the record is a tombstone or was first seen through an
    /// edit; a later NewMessage fills the original content exactly once.
    #[serde(default = "default_true")]
    pub has_original: bool,

    /// Sequence of the newest edit history entry, 0 when never edited.
    #[serde(default)]
    pub last_sequence: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl MessageRecord {
    /// A freshly observed message.
    pub fn observed(key: MessageKey, sender_id: i64, text: &str, timestamp: u64) -> Self {
        MessageRecord {
            channel_id: key.channel_id,
            message_id: key.message_id,
            sender_id,
            current_text: text.to_string(),
            original_text: text.to_string(),
            created_at: timestamp,
            is_deleted: false,
            is_edited: false,
            last_modified_at: timestamp,
            has_original: true,
            last_sequence: 0,
            deleted_at: None,
        }
    }

    /// A deletion fact for a message whose content was never observed.
    pub fn tombstone(key: MessageKey, timestamp: u64) -> Self {
        MessageRecord {
            channel_id: key.channel_id,
            message_id: key.message_id,
            sender_id: 0,
            current_text: String::new(),
            original_text: String::new(),
            created_at: timestamp,
            is_deleted: true,
            is_edited: false,
            last_modified_at: timestamp,
            has_original: false,
            last_sequence: 0,
            deleted_at: Some(timestamp),
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.channel_id, self.message_id)
    }

    pub fn state(&self) -> MessageState {
        if self.is_deleted {
            MessageState::Deleted
        } else if self.is_edited {
            MessageState::Edited
        } else {
            MessageState::Live
        }
    }

    /// Whether this record is a deletion marker with no observed content.
    pub fn is_tombstone(&self) -> bool {
        self.is_deleted && !self.has_original && !self.is_edited
    }
}

/// Reconciliation state of a message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Unseen,
    Live,
    Edited,
    /// Terminal.
    Deleted,
}

impl MessageState {
    pub fn of(record: Option<&MessageRecord>) -> Self {
        record.map_or(MessageState::Unseen, MessageRecord::state)
    }
}

/// One observed edit of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditHistoryEntry {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub text: String,
    pub observed_at: u64,
    /// Strictly increasing per key, assigned in arrival order.
    pub sequence: u64,
}

impl EditHistoryEntry {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.channel_id, self.message_id)
    }
}

/// The effect of one event on one key, committed atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub record: MessageRecord,
    pub history: Option<EditHistoryEntry>,
}

impl Mutation {
    pub fn record(record: MessageRecord) -> Self {
        Mutation {
            record,
            history: None,
        }
    }

    pub fn with_history(record: MessageRecord, entry: EditHistoryEntry) -> Self {
        Mutation {
            record,
            history: Some(entry),
        }
    }
}
