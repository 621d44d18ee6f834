use crate::error::Result;
use crate::event::{KeyOp, OpKind, RemoteEvent};
use crate::record::{EditHistoryEntry, MessageKey, MessageRecord, MessageState, Mutation};
use crate::source::{EventSource, Shutdown};
use crate::store::{MessageStore, UpdateMode};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const PREVIEW_CHARS: usize = 50;

/// Which remote event kinds are mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerOptions {
    /// Mirror new messages and keep them when they are deleted remotely.
    pub anti_delete: bool,
    /// Mirror edits and their history.
    pub save_edit_history: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        ReconcilerOptions {
            anti_delete: true,
            save_edit_history: true,
        }
    }
}

/// What applying an event did to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A record was created from observed content.
    Created,
    /// An existing record (or its history) changed.
    Updated,
    /// A deletion arrived for a key never seen; a tombstone was created.
    Tombstoned,
    /// The event was already reflected in the store.
    Duplicate,
    /// The event kind is disabled by [`ReconcilerOptions`].
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub key: MessageKey,
    pub change: Change,
}

/// Why [`Reconciler::run`] returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    Exhausted,
    Shutdown,
}

/// Tally of a [`Reconciler::run`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub delivered: usize,
    pub created: usize,
    pub updated: usize,
    pub tombstoned: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub stopped: StopReason,
}

impl RunReport {
    fn tally(&mut self, outcomes: &[Outcome]) {
        self.delivered += 1;
        for outcome in outcomes {
            match outcome.change {
                Change::Created => self.created += 1,
                Change::Updated => self.updated += 1,
                Change::Tombstoned => self.tombstoned += 1,
                Change::Duplicate => self.duplicates += 1,
                Change::Skipped => self.skipped += 1,
            }
        }
    }
}

/// Applies remote events to a [`MessageStore`].
///
/// Per key the state machine is `Unseen -> Live -> Edited -> Deleted`, with
/// `Deleted` terminal: later events may add history or fill content that was
/// never observed, but nothing clears `is_deleted`. Every transition is a
/// single atomic store update, and re-applying an event already reflected in
/// the store commits nothing.
///
/// The reconciler keeps no state between events; the next history sequence
/// is derived from the store under the key's lock.
///
/// # Examples
///
/// ```
/// use mirrorfold::{MemoryStore, MessageKey, MessageStore, Reconciler, RemoteEvent};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new());
/// let reconciler = Reconciler::new(Arc::clone(&store));
/// let key = MessageKey::new(5, 1);
///
/// reconciler.apply(&RemoteEvent::new_message(key, 9, "hello", 10)).unwrap();
/// reconciler.apply(&RemoteEvent::edited(key, "hello world", 11)).unwrap();
/// reconciler.apply(&RemoteEvent::deleted(5, &[1], 12)).unwrap();
///
/// let record = store.get(&key).unwrap().unwrap();
/// assert_eq!(record.original_text, "hello");
/// assert_eq!(record.current_text, "hello world");
/// assert!(record.is_edited && record.is_deleted);
/// ```
pub struct Reconciler<S> {
    store: Arc<S>,
    options: ReconcilerOptions,
}

impl<S: MessageStore> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Reconciler::with_options(store, ReconcilerOptions::default())
    }

    pub fn with_options(store: Arc<S>, options: ReconcilerOptions) -> Self {
        Reconciler { store, options }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> ReconcilerOptions {
        self.options
    }

    /// Apply one event. A deletion batch yields one outcome per distinct id.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Keys applied before the failure stay
    /// applied; re-applying the whole event later is safe.
    pub fn apply(&self, event: &RemoteEvent) -> Result<Vec<Outcome>> {
        event
            .operations()
            .into_iter()
            .map(|op| self.apply_op(op))
            .collect()
    }

    /// Apply one per-key operation as a single store update.
    pub fn apply_op(&self, op: KeyOp<'_>) -> Result<Outcome> {
        if !self.enabled(&op.kind) {
            return Ok(Outcome {
                key: op.key,
                change: Change::Skipped,
            });
        }

        let mut change = Change::Duplicate;
        self.store.update(op.key, UpdateMode::Upsert, |current, history| {
            let (planned, mutation) = plan(&op, current, history);
            change = planned;
            mutation
        })?;

        match change {
            Change::Duplicate => log::debug!("mirrorfold: absorbed duplicate event for {}", op.key),
            Change::Tombstoned => {
                log::info!("mirrorfold: {} deleted before it was observed, tombstoned", op.key)
            }
            _ => {}
        }
        Ok(Outcome {
            key: op.key,
            change,
        })
    }

    /// Apply a batch, running distinct keys in parallel.
    ///
    /// Operations are sharded by key hash so every operation on one key runs
    /// on the same worker, in batch order. Outcomes are returned in batch
    /// order.
    pub fn apply_batch(&self, events: &[RemoteEvent]) -> Result<Vec<Outcome>> {
        let ops: Vec<KeyOp<'_>> = events.iter().flat_map(RemoteEvent::operations).collect();
        let shards = rayon::current_num_threads().max(1);

        let mut lanes: Vec<Vec<(usize, KeyOp<'_>)>> = vec![Vec::new(); shards];
        for (index, op) in ops.into_iter().enumerate() {
            let lane = (op.key.stable_hash() % shards as u64) as usize;
            lanes[lane].push((index, op));
        }

        let applied: Vec<Vec<(usize, Outcome)>> = lanes
            .into_par_iter()
            .map(|lane| {
                lane.into_iter()
                    .map(|(index, op)| self.apply_op(op).map(|outcome| (index, outcome)))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<_>>()?;

        let mut outcomes: Vec<(usize, Outcome)> = applied.into_iter().flatten().collect();
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    /// Consume deliveries until the source is exhausted or `shutdown` fires.
    ///
    /// A delivery is acknowledged only after it was applied in full. On a
    /// store error the delivery is left unacknowledged and the error is
    /// returned, so the caller can back off and run again; the source will
    /// redeliver and re-application is a no-op for whatever already landed.
    /// Shutdown is checked between deliveries, never inside one.
    pub fn run<E>(&self, source: &mut E, shutdown: &Shutdown) -> Result<RunReport>
    where
        E: EventSource + ?Sized,
    {
        let mut report = RunReport::default();
        loop {
            if shutdown.is_triggered() {
                report.stopped = StopReason::Shutdown;
                log::info!(
                    "mirrorfold: reconciler stopped by shutdown after {} deliveries",
                    report.delivered
                );
                return Ok(report);
            }

            let Some(delivery) = source.next_delivery()? else {
                report.stopped = StopReason::Exhausted;
                return Ok(report);
            };

            let outcomes = self.apply(&delivery.event).inspect_err(|e| {
                log::warn!(
                    "mirrorfold: delivery {} left unacknowledged: {e}",
                    delivery.tag
                );
            })?;
            source.ack(delivery.tag)?;
            report.tally(&outcomes);
        }
    }

    fn enabled(&self, kind: &OpKind<'_>) -> bool {
        match kind {
            OpKind::New { .. } | OpKind::Delete => self.options.anti_delete,
            OpKind::Edit { .. } => self.options.save_edit_history,
        }
    }
}

/// Decide the effect of `op` on a key given its stored state. Pure.
///
/// An edit matching any stored entry's `(observed_at, text)` counts as a
/// redelivery, not only one matching the latest entry. Replaying a range of
/// events is therefore a no-op, but a genuine return to an earlier text
/// with the same timestamp (A, B, A at one instant) keeps B as current.
fn plan(
    op: &KeyOp<'_>,
    current: Option<&MessageRecord>,
    history: &[EditHistoryEntry],
) -> (Change, Option<Mutation>) {
    let ts = op.timestamp;
    match (op.kind, current) {
        (OpKind::New { sender_id, text }, None) => (
            Change::Created,
            Some(Mutation::record(MessageRecord::observed(
                op.key, sender_id, text, ts,
            ))),
        ),
        (OpKind::New { .. }, Some(record)) if record.has_original => (Change::Duplicate, None),
        (OpKind::New { sender_id, text }, Some(record)) => {
            // First sight of content for a tombstone or an edit-first record.
            let mut next = record.clone();
            next.original_text = text.to_string();
            next.sender_id = sender_id;
            next.created_at = ts;
            next.has_original = true;
            if !next.is_edited {
                next.current_text = text.to_string();
            }
            next.last_modified_at = next.last_modified_at.max(ts);
            (Change::Updated, Some(Mutation::record(next)))
        }

        (OpKind::Edit { text }, current) => {
            if history
                .iter()
                .any(|entry| entry.observed_at == ts && entry.text == text)
            {
                return (Change::Duplicate, None);
            }

            let last = history
                .last()
                .map_or(0, |e| e.sequence)
                .max(current.map_or(0, |r| r.last_sequence));
            let entry = EditHistoryEntry {
                channel_id: op.key.channel_id,
                message_id: op.key.message_id,
                text: text.to_string(),
                observed_at: ts,
                sequence: last + 1,
            };

            let (change, mut next) = match current {
                Some(record) => (Change::Updated, record.clone()),
                None => {
                    let mut record = MessageRecord::observed(op.key, 0, "", ts);
                    record.has_original = false;
                    (Change::Created, record)
                }
            };
            if MessageState::of(current) != MessageState::Deleted {
                next.current_text = text.to_string();
                next.is_edited = true;
            }
            next.last_sequence = entry.sequence;
            next.last_modified_at = next.last_modified_at.max(ts);
            (change, Some(Mutation::with_history(next, entry)))
        }

        (OpKind::Delete, None) => (
            Change::Tombstoned,
            Some(Mutation::record(MessageRecord::tombstone(op.key, ts))),
        ),
        (OpKind::Delete, Some(record)) if record.is_deleted => (Change::Duplicate, None),
        (OpKind::Delete, Some(record)) => {
            if record.has_original || record.is_edited {
                log::warn!(
                    "mirrorfold: message {} deleted remotely, kept: {}",
                    op.key,
                    preview(&record.current_text)
                );
            }
            let mut next = record.clone();
            next.is_deleted = true;
            next.deleted_at = Some(ts);
            next.last_modified_at = next.last_modified_at.max(ts);
            (Change::Updated, Some(Mutation::record(next)))
        }
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
