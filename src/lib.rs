//! A durable local mirror of messages observed on a remote messaging service.
//!
//! Remote create/edit/delete notifications are folded by a [`Reconciler`]
//! into a [`MessageStore`]. Deletion is a sticky flag, never a removal, and
//! the first observed text of every message is kept next to its latest edit
//! and the full edit trail. [`JournalStore`] makes each write durable before
//! it returns; [`QueryService`] answers current-view and history queries.

mod archive;
mod config;
mod durable;
mod error;
mod event;
mod journal;
mod locks;
mod query;
mod reconciler;
mod record;
mod send;
pub mod snapshot;
mod source;
mod state;
mod store;

pub use config::MirrorConfig;
pub use durable::{JournalStore, JournalStoreBuilder};
pub use error::{MirrorError, Result};
pub use event::{KeyOp, OpKind, RemoteEvent};
pub use journal::LockMode;
pub use query::QueryService;
pub use reconciler::{Change, Outcome, Reconciler, ReconcilerOptions, RunReport, StopReason};
pub use record::{
    ChannelId, EditHistoryEntry, MessageId, MessageKey, MessageRecord, MessageState, Mutation,
};
pub use send::{GhostSender, Outbound};
pub use snapshot::Checkpoint;
pub use source::{Delivery, EventSource, JsonLinesSource, MemorySource, Shutdown};
pub use store::{MemoryStore, MessageStore, UpdateMode};
