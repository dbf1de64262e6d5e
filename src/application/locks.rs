use crate::domain::group::GroupId;
use crate::domain::user::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Resource an engine operation mutates.
///
/// The derived ordering (every group before every wallet, then by id) is the
/// acquisition order, which keeps multi-key operations deadlock free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Group(GroupId),
    Wallet(UserId),
}

/// Per-key async mutual exclusion for read-modify-write sequences.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

/// Guards held for the duration of one unit of work.
pub struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every key in `keys`, sorted and deduplicated.
    pub async fn acquire(&self, mut keys: Vec<LockKey>) -> LockSet {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            // Clone the handle out so the shard lock is released before awaiting.
            let lock = self.locks.entry(key).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        LockSet { _guards: guards }
    }
}
