//! Storage for CMAB decisions.
use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

/// A cached CMAB decision.
///
/// Valid only while `attributes_hash` equals the hash of the user's current CMAB attributes for
/// the rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabCacheEntry {
    pub attributes_hash: u32,
    pub variation_id: String,
    pub cmab_uuid: Uuid,
}

/// Cache of CMAB decisions keyed by user and rule.
///
/// The CMAB service performs no locking around these calls. Implementations shared between
/// concurrent decisions must synchronize internally.
pub trait CmabCache: Send + Sync {
    fn lookup(&self, key: &str) -> Option<CmabCacheEntry>;
    fn save(&self, key: &str, entry: CmabCacheEntry);
    fn remove(&self, key: &str);
    /// Remove every entry.
    fn reset(&self);
}

/// Unbounded in-process [`CmabCache`]. Entries are only replaced or removed explicitly, there is
/// no expiry.
#[derive(Debug, Default)]
pub struct InMemoryCmabCache {
    entries: Mutex<HashMap<String, CmabCacheEntry>>,
}

impl InMemoryCmabCache {
    pub fn new() -> InMemoryCmabCache {
        InMemoryCmabCache::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("thread holding cmab cache lock should not panic")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CmabCache for InMemoryCmabCache {
    fn lookup(&self, key: &str) -> Option<CmabCacheEntry> {
        let entries = self
            .entries
            .lock()
            .expect("thread holding cmab cache lock should not panic");
        entries.get(key).cloned()
    }

    fn save(&self, key: &str, entry: CmabCacheEntry) {
        let mut entries = self
            .entries
            .lock()
            .expect("thread holding cmab cache lock should not panic");
        entries.insert(key.to_owned(), entry);
    }

    fn remove(&self, key: &str) {
        let mut entries = self
            .entries
            .lock()
            .expect("thread holding cmab cache lock should not panic");
        entries.remove(key);
    }

    fn reset(&self) {
        let mut entries = self
            .entries
            .lock()
            .expect("thread holding cmab cache lock should not panic");
        entries.clear();
    }
}
