use crate::durable::JournalStoreBuilder;
use crate::error::{MirrorError, Result};
use crate::journal::LockMode;
use crate::reconciler::ReconcilerOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for a mirror, usually read from a JSON file. Every field is
/// optional in the file:
///
/// ```
/// use mirrorfold::MirrorConfig;
///
/// let config = MirrorConfig::from_json(r#"{"data_dir": "backup", "ghost_mode": true}"#).unwrap();
/// assert!(config.ghost_mode);
/// assert!(config.anti_delete);
/// assert_eq!(config.checkpoint_every, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Directory holding the journal, archive and checkpoint.
    pub data_dir: PathBuf,
    pub anti_delete: bool,
    pub save_edit_history: bool,
    /// Suppress notifications on every outgoing send.
    pub ghost_mode: bool,
    pub lock_mode: LockMode,
    pub checkpoint_every: u64,
    pub compact_after_bytes: Option<u64>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            data_dir: PathBuf::from("mirror"),
            anti_delete: true,
            save_edit_history: true,
            ghost_mode: false,
            lock_mode: LockMode::Flock,
            checkpoint_every: 256,
            compact_after_bytes: None,
        }
    }
}

impl MirrorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&contents)
            .map_err(|e| MirrorError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: MirrorConfig =
            serde_json::from_str(json).map_err(|e| MirrorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(MirrorError::Config("data_dir must not be empty".into()));
        }
        if self.compact_after_bytes == Some(0) {
            return Err(MirrorError::Config(
                "compact_after_bytes must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn store_builder(&self) -> JournalStoreBuilder {
        let builder = JournalStoreBuilder::new(&self.data_dir)
            .lock_mode(self.lock_mode)
            .checkpoint_every(self.checkpoint_every);
        match self.compact_after_bytes {
            Some(bytes) => builder.compact_after_bytes(bytes),
            None => builder,
        }
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            anti_delete: self.anti_delete,
            save_edit_history: self.save_edit_history,
        }
    }
}
