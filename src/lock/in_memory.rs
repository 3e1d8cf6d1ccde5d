use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use super::{LockManager, ResourceId, ResourceLock};

/// Process-local lock registry backed by a `HashMap<ResourceId, Weak<ResourceLock>>`.
///
/// The registry never keeps a lock alive by itself: once the last gateway
/// holding an identity's lock is dropped, the entry is dead and gets pruned on
/// the next `acquire` (or an explicit `prune`).
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<ResourceId, Weak<ResourceLock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The registry shared by every gateway that was not given its own.
    pub fn global() -> Arc<LockRegistry> {
        static GLOBAL: OnceLock<Arc<LockRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(LockRegistry::new())).clone()
    }

    /// Identities whose lock is currently held by at least one gateway.
    pub fn live_identities(&self) -> Vec<ResourceId> {
        let locks = self.entries();
        let mut ids: Vec<ResourceId> = locks
            .iter()
            .filter(|(_, lock)| lock.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of identities with a live lock.
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose lock is no longer referenced. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut locks = self.entries();
        let before = locks.len();
        locks.retain(|_, lock| lock.strong_count() > 0);
        before - locks.len()
    }

    // Every critical section leaves the map consistent, so a poisoned map is still usable.
    fn entries(&self) -> MutexGuard<'_, HashMap<ResourceId, Weak<ResourceLock>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LockManager for LockRegistry {
    fn acquire(&self, id: &ResourceId) -> Arc<ResourceLock> {
        let mut locks = self.entries();
        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(ResourceLock::new(()));
        locks.insert(id.clone(), Arc::downgrade(&lock));
        tracing::trace!(identity = %id, "registered resource lock");
        lock
    }
}
