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
//! Persistent record of reserved addresses.
//!
//! A [Store] holds the reservations of one network and the scan cursor of each of the
//! network's range sets. All access goes through [Store::lock], which returns a guard
//! implementing [LockedStore]. The guard gives exclusive access across threads and, for
//! the [disk::DiskStore], across processes, and gives it up when dropped.

use std::{
    io,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::store::{
    disk::{DiskStore, DiskStoreGuard},
    memory::{MemoryStore, MemoryStoreGuard},
};

pub mod disk;
pub mod memory;

/// An address reserved for an owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reservation {
    /// The reserved address.
    pub address: IpAddr,
    /// Identifier of the owner, usually the container ID.
    pub owner: String,
    /// Name of the interface the address was reserved for.
    pub interface: String,
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The address is reserved by someone else.
    #[error("address {address} already reserved by {owner:?}")]
    AlreadyReserved {
        /// The contested address.
        address: IpAddr,
        /// The current owner.
        owner: String,
    },
    /// The lock could not be acquired in time.
    #[error("timed out after {0:?} waiting for the store lock")]
    LockTimeout(Duration),
    /// Reading or writing the store failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file or directory the operation failed on.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// The network name cannot be used as a directory name.
    #[error("invalid network name {0:?}")]
    InvalidNetworkName(String),
    /// An owner or interface name cannot be written to a reservation record.
    #[error("{field} {value:?} contains a line break")]
    InvalidRecordField {
        /// `owner` or `interface`.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// A lockable reservation store.
pub trait Store {
    /// Guard giving access to the store while the lock is held.
    type Guard<'a>: LockedStore
    where
        Self: 'a;

    /// Acquires the store's exclusive lock, blocking until it is available.
    ///
    /// The lock is released when the guard is dropped.
    fn lock(&self) -> Result<Self::Guard<'_>, StoreError>;
}

/// Operations on a locked store.
///
/// Every mutating operation is durable once it returns successfully.
pub trait LockedStore {
    /// Reserves `address` for `owner`.
    ///
    /// Returns `true` if the reservation was created and `false` if `owner` already held
    /// the address. Fails with [StoreError::AlreadyReserved] if another owner holds it.
    fn reserve(
        &mut self,
        address: IpAddr,
        owner: &str,
        interface: &str,
    ) -> Result<bool, StoreError>;

    /// Removes the reservation of a single address, returning whether one existed.
    fn release(&mut self, address: IpAddr) -> Result<bool, StoreError>;

    /// Removes every reservation of `owner` and returns how many there were.
    fn release_by_owner(&mut self, owner: &str) -> Result<usize, StoreError>;

    /// All reservations, sorted by address.
    fn reservations(&self) -> Result<Vec<Reservation>, StoreError>;

    /// The reservations of `owner`, sorted by address.
    fn reservations_by_owner(&self, owner: &str) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations()?
            .into_iter()
            .filter(|reservation| reservation.owner == owner)
            .collect())
    }

    /// The last address handed out by the scan of the given range set.
    fn cursor(&self, range_set: &str) -> Result<Option<IpAddr>, StoreError>;

    /// Records the last address handed out by the scan of the given range set.
    fn set_cursor(&mut self, range_set: &str, address: IpAddr) -> Result<(), StoreError>;
}

/// Selects and parameterizes the store implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Reservations are files in a per-network directory below `data_dir`.
    Disk {
        /// Root directory holding one directory per network.
        data_dir: PathBuf,
        /// Upper bound on the time spent waiting for the lock.
        lock_timeout: Duration,
    },
    /// Reservations live in memory and are lost when the process exits.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Disk {
            data_dir: PathBuf::from(disk::DEFAULT_DATA_DIR),
            lock_timeout: disk::DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Opens the store of the given network.
    pub fn open(&self, network: &str) -> Result<StoreBackend, StoreError> {
        match self {
            StoreConfig::Disk {
                data_dir,
                lock_timeout,
            } => {
                Ok(StoreBackend::Disk(
                    DiskStore::open(data_dir, network)?.with_lock_timeout(*lock_timeout),
                ))
            }
            StoreConfig::Memory => Ok(StoreBackend::Memory(MemoryStore::new())),
        }
    }
}

/// The store selected by a [StoreConfig].
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Durable, file based store.
    Disk(DiskStore),
    /// In-memory store.
    Memory(MemoryStore),
}

/// Guard of a [StoreBackend].
pub enum StoreBackendGuard<'a> {
    /// Guard of the file based store.
    Disk(DiskStoreGuard<'a>),
    /// Guard of the in-memory store.
    Memory(MemoryStoreGuard<'a>),
}

impl Store for StoreBackend {
    type Guard<'a> = StoreBackendGuard<'a>;

    fn lock(&self) -> Result<Self::Guard<'_>, StoreError> {
        match self {
            StoreBackend::Disk(store) => store.lock().map(StoreBackendGuard::Disk),
            StoreBackend::Memory(store) => store.lock().map(StoreBackendGuard::Memory),
        }
    }
}

impl LockedStore for StoreBackendGuard<'_> {
    fn reserve(
        &mut self,
        address: IpAddr,
        owner: &str,
        interface: &str,
    ) -> Result<bool, StoreError> {
        match self {
            StoreBackendGuard::Disk(guard) => guard.reserve(address, owner, interface),
            StoreBackendGuard::Memory(guard) => guard.reserve(address, owner, interface),
        }
    }

    fn release(&mut self, address: IpAddr) -> Result<bool, StoreError> {
        match self {
            StoreBackendGuard::Disk(guard) => guard.release(address),
            StoreBackendGuard::Memory(guard) => guard.release(address),
        }
    }

    fn release_by_owner(&mut self, owner: &str) -> Result<usize, StoreError> {
        match self {
            StoreBackendGuard::Disk(guard) => guard.release_by_owner(owner),
            StoreBackendGuard::Memory(guard) => guard.release_by_owner(owner),
        }
    }

    fn reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        match self {
            StoreBackendGuard::Disk(guard) => guard.reservations(),
            StoreBackendGuard::Memory(guard) => guard.reservations(),
        }
    }

    fn cursor(&self, range_set: &str) -> Result<Option<IpAddr>, StoreError> {
        match self {
            StoreBackendGuard::Disk(guard) => guard.cursor(range_set),
            StoreBackendGuard::Memory(guard) => guard.cursor(range_set),
        }
    }

    fn set_cursor(&mut self, range_set: &str, address: IpAddr) -> Result<(), StoreError> {
        match self {
            StoreBackendGuard::Disk(guard) => guard.set_cursor(range_set, address),
            StoreBackendGuard::Memory(guard) => guard.set_cursor(range_set, address),
        }
    }
}
