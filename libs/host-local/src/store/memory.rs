// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! In-memory store, shared between clones.

use std::{
    collections::{BTreeMap, HashMap},
    net::IpAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::store::{LockedStore, Reservation, Store, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    reservations: BTreeMap<IpAddr, (String, String)>,
    cursors: HashMap<String, IpAddr>,
}

/// Store keeping reservations in memory.
///
/// Clones share the same reservations.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with a reservation.
    pub fn with_reservation(
        self,
        address: IpAddr,
        owner: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        self.state()
            .reservations
            .insert(address, (owner.into(), interface.into()));
        self
    }

    /// Seeds the cursor of a range set.
    pub fn with_cursor(self, range_set: impl Into<String>, address: IpAddr) -> Self {
        self.state().cursors.insert(range_set.into(), address);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Every mutation is a single map operation, so the state stays consistent even if
        // a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    type Guard<'a> = MemoryStoreGuard<'a>;

    fn lock(&self) -> Result<Self::Guard<'_>, StoreError> {
        Ok(MemoryStoreGuard {
            state: self.state(),
        })
    }
}

/// Lock guard of a [MemoryStore].
pub struct MemoryStoreGuard<'a> {
    state: MutexGuard<'a, MemoryState>,
}

impl LockedStore for MemoryStoreGuard<'_> {
    fn reserve(
        &mut self,
        address: IpAddr,
        owner: &str,
        interface: &str,
    ) -> Result<bool, StoreError> {
        match self.state.reservations.get(&address) {
            Some((holder, _)) if holder == owner => Ok(false),
            Some((holder, _)) => {
                Err(StoreError::AlreadyReserved {
                    address,
                    owner: holder.clone(),
                })
            }
            None => {
                self.state
                    .reservations
                    .insert(address, (owner.to_string(), interface.to_string()));
                Ok(true)
            }
        }
    }

    fn release(&mut self, address: IpAddr) -> Result<bool, StoreError> {
        Ok(self.state.reservations.remove(&address).is_some())
    }

    fn release_by_owner(&mut self, owner: &str) -> Result<usize, StoreError> {
        let before = self.state.reservations.len();
        self.state
            .reservations
            .retain(|_, (holder, _)| holder != owner);
        Ok(before - self.state.reservations.len())
    }

    fn reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .state
            .reservations
            .iter()
            .map(|(address, (owner, interface))| {
                Reservation {
                    address: *address,
                    owner: owner.clone(),
                    interface: interface.clone(),
                }
            })
            .collect())
    }

    fn cursor(&self, range_set: &str) -> Result<Option<IpAddr>, StoreError> {
        Ok(self.state.cursors.get(range_set).copied())
    }

    fn set_cursor(&mut self, range_set: &str, address: IpAddr) -> Result<(), StoreError> {
        self.state.cursors.insert(range_set.to_string(), address);
        Ok(())
    }
}
