//! In-memory lock ledger
//!
//! Maps a resource key to the identity of its holder. Only the coordinating
//! process owns a ledger; nothing here is persisted.

use super::types::LockEntry;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct LockLedger {
    entries: HashMap<String, String>,
}

impl LockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key -> holder` if the key is free. Never blocks.
    pub fn try_acquire(&mut self, key: &str, holder: &str) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }

        debug!(lock_key = %key, holder = %holder, "ledger: lock");
        self.entries.insert(key.to_string(), holder.to_string());
        true
    }

    /// Remove the entry only when `holder` owns it.
    ///
    /// Returns whether an entry was removed; a mismatch is a silent no-op.
    pub fn release(&mut self, key: &str, holder: &str) -> bool {
        match self.entries.get(key) {
            Some(current) if current == holder => {
                debug!(lock_key = %key, holder = %holder, "ledger: unlock");
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn holder(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every held lock, sorted by key
    pub fn entries(&self) -> Vec<LockEntry> {
        let mut entries: Vec<LockEntry> = self
            .entries
            .iter()
            .map(|(key, holder)| LockEntry {
                key: key.clone(),
                holder: holder.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}
