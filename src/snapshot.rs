//! Checkpoint persistence for the mirror's in-memory tables.

use crate::record::{EditHistoryEntry, MessageRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub(crate) const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Both logical tables, flattened for serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableImage {
    pub messages: Vec<MessageRecord>,
    pub history: Vec<EditHistoryEntry>,
}

/// A persisted checkpoint of the mirror state.
///
/// Written atomically (`.tmp` + rename). On open only journal lines after
/// `offset` need to be folded:
///
/// ```text
/// $ jq '{offset, hash, messages: (.state.messages | length)}' checkpoint.json
/// { "offset": 18231, "hash": "5be2c0a1f3d9e874", "messages": 412 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Checkpoint {
    pub state: TableImage,

    /// Byte offset into the active journal after the last folded commit.
    /// Anything archived has always been folded already.
    pub offset: u64,

    /// Hex xxh64 of the last folded journal line; empty at offset 0.
    pub hash: String,
}

impl Checkpoint {
    pub fn new(state: TableImage, offset: u64, hash: String) -> Self {
        Checkpoint {
            state,
            offset,
            hash,
        }
    }
}

/// Save a checkpoint atomically. If the process dies mid-write the previous
/// checkpoint survives intact.
pub fn save(path: &Path, checkpoint: &Checkpoint) -> io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    let json = serde_json::to_vec(checkpoint)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a checkpoint. A missing or undecodable file yields `Ok(None)`, which
/// makes the caller replay the journal from scratch.
pub fn load(path: &Path) -> io::Result<Option<Checkpoint>> {
    let contents = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    match serde_json::from_slice(&contents) {
        Ok(checkpoint) => Ok(Some(checkpoint)),
        Err(e) => {
            log::warn!("mirrorfold: unreadable checkpoint {}: {e}", path.display());
            Ok(None)
        }
    }
}
