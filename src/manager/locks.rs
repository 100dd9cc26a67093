//! Keyed async locks serialising mount-table mutations per device and per
//! mount point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guards held for the duration of one mount-table mutation.
#[derive(Debug)]
pub(crate) struct MountGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Table of per-key locks. Unused entries are pruned on each acquisition.
#[derive(Debug, Default)]
pub(crate) struct MountLocks {
    entries: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MountLocks {
    /// Acquires the locks for every key. Keys are taken in sorted order so
    /// two callers sharing keys cannot deadlock.
    pub(crate) async fn acquire(&self, keys: &[&str]) -> MountGuard {
        let mut ordered = keys.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let handles: Vec<Arc<Mutex<()>>> = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries.retain(|_, handle| Arc::strong_count(handle) > 1);
            ordered
                .iter()
                .map(|key| Arc::clone(entries.entry((*key).to_owned()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        MountGuard { _guards: guards }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
