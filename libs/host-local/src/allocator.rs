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
//! Round-robin IP address allocator.

use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

use crate::{
    range::RangeSet,
    store::{LockedStore, Store, StoreError},
};

/// Allocates addresses of a [RangeSet], recording reservations in a [Store].
///
/// The allocator keeps no state between calls. Every call holds the store lock for its
/// whole duration, so allocators in different processes can share one store.
// Impl Note:
// Free addresses are not tracked. A scan walks the ring of usable addresses, starting
// right after the cursor, and reserves the first address the store accepts.
#[derive(Debug, Clone)]
pub struct Allocator<S> {
    range_set: RangeSet,
    store: S,
}

/// An address handed out by the [Allocator].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The reserved address.
    pub address: IpAddr,
    /// Subnet of the range the address belongs to.
    pub subnet: IpNet,
    /// Gateway of the range the address belongs to.
    pub gateway: IpAddr,
}

/// Address allocation errors.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The requested address cannot be handed out.
    #[error("requested IP address {address} is not available in network: {network}")]
    RequestedAddressInvalid {
        /// The requested address.
        address: IpAddr,
        /// The network allocated from.
        network: String,
    },
    /// Every usable address is reserved.
    #[error("no IP addresses available in network: {0}")]
    AddressesExhausted(String),
    /// The store failed.
    #[error("store failure in network {network}: {source}")]
    Store {
        /// The network allocated from.
        network: String,
        /// The underlying error.
        #[source]
        source: StoreError,
    },
}

impl<S: Store> Allocator<S> {
    /// Creates an allocator handing out addresses of `range_set`.
    pub fn new(range_set: RangeSet, store: S) -> Self {
        Self { range_set, store }
    }

    /// The range set addresses are taken from.
    pub fn range_set(&self) -> &RangeSet {
        &self.range_set
    }

    /// The store reservations are recorded in.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserves an address for the interface `interface` of `owner`.
    ///
    /// With a `requested` address, exactly that address is reserved. Otherwise the next
    /// free address after the range set's cursor is reserved and the cursor moves to it.
    /// An owner that already holds an address of this range set for `interface` gets that
    /// address again.
    pub fn get(
        &self,
        owner: &str,
        interface: &str,
        requested: Option<IpAddr>,
    ) -> Result<Allocation, AllocationError> {
        let mut guard = self.store.lock().map_err(|e| self.store_error(e))?;
        match requested {
            Some(address) => self.reserve_requested(&mut guard, owner, interface, address),
            None => self.reserve_next(&mut guard, owner, interface),
        }
    }

    /// Releases every address held by `owner`.
    ///
    /// Releasing an owner without reservations is not an error. Returns the number of
    /// released addresses.
    pub fn release(&self, owner: &str, interface: &str) -> Result<usize, AllocationError> {
        let mut guard = self.store.lock().map_err(|e| self.store_error(e))?;
        let released = guard
            .release_by_owner(owner)
            .map_err(|e| self.store_error(e))?;
        tracing::info!(
            network = self.range_set.network(),
            owner,
            interface,
            released,
            "Released addresses"
        );
        Ok(released)
    }

    /// The addresses of this range set held by `owner` for `interface`.
    pub fn lookup(&self, owner: &str, interface: &str) -> Result<Vec<Allocation>, AllocationError> {
        let guard = self.store.lock().map_err(|e| self.store_error(e))?;
        let reservations = guard
            .reservations_by_owner(owner)
            .map_err(|e| self.store_error(e))?;
        Ok(reservations
            .into_iter()
            .filter(|reservation| reservation.interface == interface)
            .filter_map(|reservation| self.allocation(reservation.address))
            .collect())
    }

    fn reserve_requested<G: LockedStore>(
        &self,
        guard: &mut G,
        owner: &str,
        interface: &str,
        address: IpAddr,
    ) -> Result<Allocation, AllocationError> {
        let invalid = || {
            AllocationError::RequestedAddressInvalid {
                address,
                network: self.range_set.network().to_string(),
            }
        };
        if self.range_set.is_gateway(address) {
            return Err(invalid());
        }
        let Some(allocation) = self.allocation(address) else {
            return Err(invalid());
        };

        match guard.reserve(address, owner, interface) {
            Ok(created) => {
                tracing::info!(
                    network = self.range_set.network(),
                    owner,
                    interface,
                    %address,
                    created,
                    "Reserved requested address"
                );
                Ok(allocation)
            }
            Err(StoreError::AlreadyReserved { owner: holder, .. }) => {
                tracing::debug!(%address, %holder, "Requested address held by another owner");
                Err(invalid())
            }
            Err(e) => Err(self.store_error(e)),
        }
    }

    fn reserve_next<G: LockedStore>(
        &self,
        guard: &mut G,
        owner: &str,
        interface: &str,
    ) -> Result<Allocation, AllocationError> {
        let set = &self.range_set;

        // A retried request gets the address it was given before.
        let held = guard
            .reservations_by_owner(owner)
            .map_err(|e| self.store_error(e))?;
        if let Some(allocation) = held
            .iter()
            .filter(|reservation| reservation.interface == interface)
            .find_map(|reservation| self.allocation(reservation.address))
        {
            tracing::info!(
                network = set.network(),
                owner,
                interface,
                address = %allocation.address,
                "Owner already holds an address"
            );
            return Ok(allocation);
        }

        let cursor = guard.cursor(set.id()).map_err(|e| self.store_error(e))?;
        tracing::debug!(
            network = set.network(),
            range_set = set.id(),
            cursor = ?cursor,
            "Scanning for a free address"
        );

        for address in set.candidates_from(cursor) {
            let Some(allocation) = self.allocation(address) else {
                continue;
            };
            match guard.reserve(address, owner, interface) {
                Ok(true) => {
                    if let Err(e) = guard.set_cursor(set.id(), address) {
                        // The call fails, so the reservation must not outlive it.
                        if let Err(rollback) = guard.release(address) {
                            tracing::warn!(
                                %address,
                                "Failed to roll back reservation: {rollback}"
                            );
                        }
                        return Err(self.store_error(e));
                    }
                    tracing::info!(
                        network = set.network(),
                        owner,
                        interface,
                        %address,
                        "Reserved address"
                    );
                    return Ok(allocation);
                }
                // Held by the same owner for another interface.
                Ok(false) => continue,
                Err(StoreError::AlreadyReserved { .. }) => continue,
                Err(e) => return Err(self.store_error(e)),
            }
        }

        tracing::debug!(network = set.network(), "No free address left");
        Err(AllocationError::AddressesExhausted(set.network().to_string()))
    }

    fn allocation(&self, address: IpAddr) -> Option<Allocation> {
        self.range_set
            .range_containing(address)
            .map(|range| {
                Allocation {
                    address,
                    subnet: range.subnet(),
                    gateway: range.gateway(),
                }
            })
    }

    fn store_error(&self, source: StoreError) -> AllocationError {
        AllocationError::Store {
            network: self.range_set.network().to_string(),
            source,
        }
    }
}
