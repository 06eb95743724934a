/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async mutual exclusion keyed by value.
///
/// Operations on different keys never wait on each other. Entries are
/// dropped once the last holder or waiter for a key goes away.
#[derive(Debug)]
pub(crate) struct KeyedMutex<K> {
    slots: Arc<Mutex<HashMap<K, Slot>>>,
}

#[derive(Debug)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

impl<K> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self { slots: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub async fn lock(&self, key: K) -> KeyedMutexGuard<K> {
        let lock = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            slot.lock.clone()
        };

        // If this future is dropped while waiting, the counter must still
        // go down, so the release handle exists before the await.
        let release = Release { slots: self.slots.clone(), key: Some(key) };
        let guard = lock.lock_owned().await;
        KeyedMutexGuard { _guard: guard, _release: release }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

fn lock_slots<K>(
    slots: &Mutex<HashMap<K, Slot>>,
) -> std::sync::MutexGuard<'_, HashMap<K, Slot>> {
    // The map is only touched in short non-panicking sections.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct Release<K: Eq + Hash> {
    slots: Arc<Mutex<HashMap<K, Slot>>>,
    key: Option<K>,
}

impl<K: Eq + Hash> Drop for Release<K> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut slots = lock_slots(&self.slots);
        let remove = match slots.get_mut(&key) {
            Some(slot) => {
                slot.users -= 1;
                slot.users == 0
            }
            None => false,
        };
        if remove {
            let _ = slots.remove(&key);
        }
    }
}

/// Held for the duration of one operation on a key.
#[derive(Debug)]
pub(crate) struct KeyedMutexGuard<K: Eq + Hash> {
    // Field order matters: the lock is released before the slot count.
    _guard: OwnedMutexGuard<()>,
    _release: Release<K>,
}
