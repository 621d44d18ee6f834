use crate::record::{ChannelId, MessageId, MessageKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A notification observed on the remote messaging service.
///
/// Serialized with a `"type"` tag so event streams can be captured and
/// replayed as JSON lines:
///
/// ```
/// use mirrorfold::RemoteEvent;
///
/// let line = r#"{"type":"messages_deleted","channel_id":7,"message_ids":[1,2],"timestamp":90}"#;
/// let event: RemoteEvent = serde_json::from_str(line).unwrap();
/// assert_eq!(event.keys().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteEvent {
    NewMessage {
        channel_id: ChannelId,
        message_id: MessageId,
        sender_id: i64,
        text: String,
        timestamp: u64,
    },
    MessageEdited {
        channel_id: ChannelId,
        message_id: MessageId,
        text: String,
        timestamp: u64,
    },
    MessagesDeleted {
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
        timestamp: u64,
    },
}

impl RemoteEvent {
    pub fn new_message(key: MessageKey, sender_id: i64, text: &str, timestamp: u64) -> Self {
        RemoteEvent::NewMessage {
            channel_id: key.channel_id,
            message_id: key.message_id,
            sender_id,
            text: text.to_string(),
            timestamp,
        }
    }

    pub fn edited(key: MessageKey, text: &str, timestamp: u64) -> Self {
        RemoteEvent::MessageEdited {
            channel_id: key.channel_id,
            message_id: key.message_id,
            text: text.to_string(),
            timestamp,
        }
    }

    pub fn deleted(channel_id: ChannelId, message_ids: &[MessageId], timestamp: u64) -> Self {
        RemoteEvent::MessagesDeleted {
            channel_id,
            message_ids: message_ids.to_vec(),
            timestamp,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            RemoteEvent::NewMessage { channel_id, .. }
            | RemoteEvent::MessageEdited { channel_id, .. }
            | RemoteEvent::MessagesDeleted { channel_id, .. } => *channel_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            RemoteEvent::NewMessage { timestamp, .. }
            | RemoteEvent::MessageEdited { timestamp, .. }
            | RemoteEvent::MessagesDeleted { timestamp, .. } => *timestamp,
        }
    }

    /// Every key this event touches, in delivery order. A repeated id in a
    /// deletion batch appears once.
    pub fn keys(&self) -> Vec<MessageKey> {
        self.operations().into_iter().map(|op| op.key).collect()
    }

    /// Split the event into independent per-key operations.
    pub fn operations(&self) -> Vec<KeyOp<'_>> {
        match self {
            RemoteEvent::NewMessage {
                channel_id,
                message_id,
                sender_id,
                text,
                timestamp,
            } => vec![KeyOp {
                key: MessageKey::new(*channel_id, *message_id),
                timestamp: *timestamp,
                kind: OpKind::New {
                    sender_id: *sender_id,
                    text,
                },
            }],
            RemoteEvent::MessageEdited {
                channel_id,
                message_id,
                text,
                timestamp,
            } => vec![KeyOp {
                key: MessageKey::new(*channel_id, *message_id),
                timestamp: *timestamp,
                kind: OpKind::Edit { text },
            }],
            RemoteEvent::MessagesDeleted {
                channel_id,
                message_ids,
                timestamp,
            } => {
                let mut seen = HashSet::with_capacity(message_ids.len());
                let mut ops = Vec::with_capacity(message_ids.len());
                for id in message_ids {
                    if !seen.insert(*id) {
                        continue;
                    }
                    let key = MessageKey::new(*channel_id, *id);
                    ops.push(KeyOp {
                        key,
                        timestamp: *timestamp,
                        kind: OpKind::Delete,
                    });
                }
                ops
            }
        }
    }
}

/// One event's effect on a single key, borrowed from the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOp<'a> {
    pub key: MessageKey,
    pub timestamp: u64,
    pub kind: OpKind<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind<'a> {
    New { sender_id: i64, text: &'a str },
    Edit { text: &'a str },
    Delete,
}
