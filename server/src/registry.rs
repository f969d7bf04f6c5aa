//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Connection registry
//!
//! The registry is the authoritative set of live connections. It is a slot
//! map behind a single lock: inserting yields a [`ConnectionHandle`] made of
//! a slot index and a generation, and erasing by handle is O(1). Vacated
//! slots bump their generation, so a stale handle can never reach a newer
//! occupant of the same slot.
//!
//! Insertion is split in two steps so a connection can be built knowing its
//! own handle: [`ConnectionRegistry::reserve`] claims a placeholder slot and
//! [`ConnectionRegistry::fill`] installs the value. Placeholders can be
//! removed like any other entry but are not counted by
//! [`ConnectionRegistry::len`].

use crate::Connection;
use crate::types::ConnectionHandle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Reserved { generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

impl<T> Slot<T> {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. }
            | Slot::Reserved { generation }
            | Slot::Vacant { generation, .. } => *generation,
        }
    }
}

#[derive(Debug)]
struct Slots<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    occupied: usize,
}

impl<T> Slots<T> {
    fn vacate(&mut self, index: u32) -> Option<T> {
        let slot = &mut self.slots[index as usize];
        let generation = slot.generation().wrapping_add(1);
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
                generation,
            },
        );
        self.free_head = Some(index);
        match old {
            Slot::Occupied { value, .. } => {
                self.occupied -= 1;
                Some(value)
            }
            _ => None,
        }
    }
}

/// Generation-checked registry of live connections
///
/// Generic over the stored value so the slot-map mechanics can be exercised
/// on their own; the reactor stores `Arc<Connection>`.
#[derive(Debug)]
pub struct ConnectionRegistry<T = Arc<Connection>> {
    inner: Mutex<Slots<T>>,
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConnectionRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty registry with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::with_capacity(capacity),
                free_head: None,
                occupied: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a placeholder slot and return its stable handle
    ///
    /// Returns `None` only when the index space is exhausted.
    pub fn reserve(&self) -> Option<ConnectionHandle> {
        let mut inner = self.lock();

        if let Some(index) = inner.free_head {
            let slot = &mut inner.slots[index as usize];
            let Slot::Vacant {
                next_free,
                generation,
            } = *slot
            else {
                return None;
            };
            *slot = Slot::Reserved { generation };
            inner.free_head = next_free;
            return Some(ConnectionHandle::new(index, generation));
        }

        let index = u32::try_from(inner.slots.len()).ok()?;
        inner.slots.push(Slot::Reserved { generation: 0 });
        Some(ConnectionHandle::new(index, 0))
    }

    /// Install `value` into a reserved placeholder
    ///
    /// Gives the value back if `handle` does not name a reserved slot (for
    /// example because the placeholder was removed in the meantime).
    pub fn fill(&self, handle: ConnectionHandle, value: T) -> Result<(), T> {
        let mut inner = self.lock();
        match inner.slots.get_mut(handle.index() as usize) {
            Some(slot @ Slot::Reserved { .. }) if slot.generation() == handle.generation() => {
                *slot = Slot::Occupied {
                    value,
                    generation: handle.generation(),
                };
                inner.occupied += 1;
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Reserve and fill in one step
    pub fn insert(&self, value: T) -> Option<ConnectionHandle> {
        let handle = self.reserve()?;
        match self.fill(handle, value) {
            Ok(()) => Some(handle),
            Err(_) => None,
        }
    }

    /// Remove the entry named by `handle`
    ///
    /// Returns the stored value, or `None` for placeholders and stale
    /// handles. A placeholder is still released.
    pub fn remove(&self, handle: ConnectionHandle) -> Option<T> {
        let mut inner = self.lock();
        let live = match inner.slots.get(handle.index() as usize) {
            Some(Slot::Vacant { .. }) | None => false,
            Some(slot) => slot.generation() == handle.generation(),
        };
        if !live {
            return None;
        }
        inner.vacate(handle.index())
    }

    /// Check whether `handle` names a live entry or placeholder
    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        let inner = self.lock();
        match inner.slots.get(handle.index() as usize) {
            Some(Slot::Vacant { .. }) | None => false,
            Some(slot) => slot.generation() == handle.generation(),
        }
    }

    /// Number of filled entries
    ///
    /// Placeholders from [`ConnectionRegistry::reserve`] are not counted
    /// until they are filled.
    pub fn len(&self) -> usize {
        self.lock().occupied
    }

    /// Check if the registry holds no filled entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, returning the stored values
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.lock();
        let mut values = Vec::with_capacity(inner.occupied);
        for index in 0..inner.slots.len() {
            if !matches!(inner.slots[index], Slot::Vacant { .. }) {
                values.extend(inner.vacate(index as u32));
            }
        }
        values
    }
}

impl<T: Clone> ConnectionRegistry<T> {
    /// Look up the entry named by `handle`
    pub fn get(&self, handle: ConnectionHandle) -> Option<T> {
        let inner = self.lock();
        match inner.slots.get(handle.index() as usize)? {
            Slot::Occupied { value, generation } if *generation == handle.generation() => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Snapshot of every filled entry with its handle
    pub fn entries(&self) -> Vec<(ConnectionHandle, T)> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { value, generation } => Some((
                    ConnectionHandle::new(index as u32, *generation),
                    value.clone(),
                )),
                _ => None,
            })
            .collect()
    }
}
