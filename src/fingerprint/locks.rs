// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Keyed per-fingerprint mutexes for at-most-one-build coordination.
//!
//! Before building a result, a worker task takes the mutex for that
//! fingerprint; concurrent requests for the same fingerprint block until
//! the first build seals, then re-probe the cache. Entries are
//! reference-counted and dropped from the map when the last holder
//! releases, so the map stays proportional to in-flight builds rather
//! than to every fingerprint ever seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::Digest;

struct Slot {
    mutex: Arc<Mutex<()>>,
    holders: usize,
}

/// Reference-counted map of `fingerprint -> async mutex`.
#[derive(Default)]
pub struct FingerprintLocks {
    slots: StdMutex<HashMap<Digest, Slot>>,
}

/// Guard returned by [`FingerprintLocks::acquire`]. Releases the build
/// lock and decrements the slot refcount on drop.
pub struct FingerprintGuard {
    locks: Arc<FingerprintLocks>,
    fingerprint: Digest,
    // Option so Drop can release the mutex before the refcount update.
    guard: Option<OwnedMutexGuard<()>>,
}

impl FingerprintLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the build lock for `fingerprint`, waiting if another task
    /// holds it.
    pub async fn acquire(self: &Arc<Self>, fingerprint: Digest) -> FingerprintGuard {
        let mutex = {
            let mut slots = self.slots.lock().expect("fingerprint lock map poisoned");
            let slot = slots.entry(fingerprint).or_insert_with(|| Slot {
                mutex: Arc::new(Mutex::new(())),
                holders: 0,
            });
            slot.holders += 1;
            Arc::clone(&slot.mutex)
        };

        let guard = mutex.lock_owned().await;
        FingerprintGuard {
            locks: Arc::clone(self),
            fingerprint,
            guard: Some(guard),
        }
    }

    /// Number of fingerprints currently tracked (in-flight or contended).
    pub fn tracked(&self) -> usize {
        self.slots.lock().expect("fingerprint lock map poisoned").len()
    }

    fn release(&self, fingerprint: &Digest) {
        let mut slots = self.slots.lock().expect("fingerprint lock map poisoned");
        if let Some(slot) = slots.get_mut(fingerprint) {
            slot.holders -= 1;
            if slot.holders == 0 {
                slots.remove(fingerprint);
            }
        }
    }
}

impl Drop for FingerprintGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.fingerprint);
    }
}
