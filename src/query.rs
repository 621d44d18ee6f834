use crate::record::{ChannelId, EditHistoryEntry, MessageKey, MessageRecord, MessageState};
use crate::store::MessageStore;
use std::sync::Arc;

/// Read-only view over a [`MessageStore`].
///
/// Safe to use from any number of threads while a reconciler writes. Store
/// failures are logged and answered with absent or empty results rather
/// than errors, so a degraded store still serves whatever it can.
pub struct QueryService<S> {
    store: Arc<S>,
}

impl<S> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        QueryService {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: MessageStore> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        QueryService { store }
    }

    /// The live view of a message, flags included. `None` means the key was
    /// never observed, not that it was deleted.
    pub fn get_current(&self, key: &MessageKey) -> Option<MessageRecord> {
        self.store.get(key).unwrap_or_else(|e| {
            log::warn!("mirrorfold: lookup of {key} failed: {e}");
            None
        })
    }

    pub fn state(&self, key: &MessageKey) -> MessageState {
        MessageState::of(self.get_current(key).as_ref())
    }

    /// One page of deleted messages, newest `created_at` first.
    pub fn list_deleted(
        &self,
        channel_id: ChannelId,
        limit: usize,
        offset: usize,
    ) -> Vec<MessageRecord> {
        let records = self.store.query_deleted(channel_id).unwrap_or_else(|e| {
            log::warn!("mirrorfold: listing deleted messages of {channel_id} failed: {e}");
            Vec::new()
        });
        records.into_iter().skip(offset).take(limit).collect()
    }

    /// One page of edited messages, newest `created_at` first.
    pub fn list_edited(
        &self,
        channel_id: ChannelId,
        limit: usize,
        offset: usize,
    ) -> Vec<MessageRecord> {
        let records = self.store.query_edited(channel_id).unwrap_or_else(|e| {
            log::warn!("mirrorfold: listing edited messages of {channel_id} failed: {e}");
            Vec::new()
        });
        records.into_iter().skip(offset).take(limit).collect()
    }

    /// Full edit trail, oldest first.
    ///
    /// The first entry has sequence 0 and carries the original text as
    /// observed at `created_at` (empty if the message was never observed
    /// before being edited or deleted); the stored edits follow with
    /// strictly increasing sequences. Empty for an unknown key.
    pub fn get_history(&self, key: &MessageKey) -> Vec<EditHistoryEntry> {
        let (record, stored) = self.store.get_with_history(key).unwrap_or_else(|e| {
            log::warn!("mirrorfold: history of {key} failed: {e}");
            (None, Vec::new())
        });

        let Some(record) = record else {
            return stored;
        };

        let mut trail = Vec::with_capacity(stored.len() + 1);
        trail.push(EditHistoryEntry {
            channel_id: key.channel_id,
            message_id: key.message_id,
            text: record.original_text,
            observed_at: record.created_at,
            sequence: 0,
        });
        trail.extend(stored);
        trail
    }
}
