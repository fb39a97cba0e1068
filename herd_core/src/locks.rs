//! Per-owner serialization of read-modify-write sequences.

use crate::OwnerId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per owner, created on first use
#[derive(Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, owner_id: OwnerId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(owner_id).or_default())
    }

    /// Run `f` while holding the owner's lock
    ///
    /// A panic in an earlier holder does not wedge the owner: the guarded
    /// data is `()`, so a poisoned lock is simply taken over.
    pub fn with_lock<T>(&self, owner_id: OwnerId, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(owner_id);
        let _guard: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
