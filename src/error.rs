use crate::record::MessageKey;
use std::io;
use thiserror::Error;

/// Errors produced by the mirror.
///
/// Duplicate deliveries and deletions of unknown messages are not errors:
/// the reconciler absorbs the former and tombstones the latter.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The backing storage could not complete a read or write. Transient;
    /// the event that triggered it was not applied and may be retried.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] io::Error),

    /// An update required an existing record and none was found.
    #[error("no record for message {0}")]
    NotFound(MessageKey),

    /// A history entry did not follow the last stored entry for its key.
    #[error("history entry {sequence} for message {key} does not follow {last}")]
    OutOfSequence {
        key: MessageKey,
        sequence: u64,
        last: u64,
    },

    /// The event source failed to yield or acknowledge a delivery.
    #[error("event source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The configuration file could not be read or is invalid.
    #[error("invalid config: {0}")]
    Config(String),
}

impl MirrorError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::StorageUnavailable(_) | MirrorError::Source(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MirrorError>;
