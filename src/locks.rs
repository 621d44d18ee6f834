use crate::record::MessageKey;
use parking_lot::{Mutex, MutexGuard};

const DEFAULT_STRIPES: usize = 64;

/// Striped per-key mutual exclusion.
///
/// Two operations on the same key always contend for the same stripe;
/// operations on different keys contend only on a hash collision.
pub(crate) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        KeyLocks {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock(&self, key: &MessageKey) -> MutexGuard<'_, ()> {
        let index = (key.stable_hash() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        KeyLocks::new(DEFAULT_STRIPES)
    }
}
