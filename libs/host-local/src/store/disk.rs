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
//! File based store.
//!
//! Every network gets a directory below the data directory. Inside it:
//!
//! * one file per reservation, named after the address and holding the owner and the
//!   interface name separated by the first line break,
//! * one `last_reserved_ip.<range set>` file per range set holding the cursor,
//! * a `lock` file that is only ever used for locking.
//!
//! Files are replaced atomically (write to a temporary file, fsync, rename, fsync the
//! directory), so a reservation that was reported as created survives a crash.
//!
//! The lock is an advisory [File::try_lock] lock, `flock(2)` on Linux. The kernel drops
//! it when the holding process exits, including on a crash. A holder that hangs while
//! holding the lock blocks every other process until their lock timeout expires.

use std::{
    fs::{self, File, OpenOptions, TryLockError},
    io::{self, Write},
    net::IpAddr,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use crate::store::{LockedStore, Reservation, Store, StoreError};

/// Default root directory of the per-network directories.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni/networks";
/// Default upper bound on the time spent waiting for the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_FILE: &str = "lock";
const CURSOR_FILE_PREFIX: &str = "last_reserved_ip.";
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Store keeping one file per reservation in a per-network directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl DiskStore {
    /// Opens the store of `network` below `data_dir`, creating its directory if needed.
    pub fn open(data_dir: impl AsRef<Path>, network: &str) -> Result<Self, StoreError> {
        if network.is_empty()
            || network == "."
            || network == ".."
            || network.contains(['/', '\0'])
        {
            return Err(StoreError::InvalidNetworkName(network.to_string()));
        }

        let dir = data_dir.as_ref().join(network);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Set the upper bound on the time spent waiting for the lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// The directory holding this network's records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Store for DiskStore {
    type Guard<'a> = DiskStoreGuard<'a>;

    fn lock(&self) -> Result<Self::Guard<'_>, StoreError> {
        let path = self.dir.join(LOCK_FILE);
        // Each lock call gets its own open file description, locks held through different
        // descriptions exclude each other within a process too.
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match lock_file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::Error(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            dir = %self.dir.display(),
                            timeout = ?self.lock_timeout,
                            "Gave up waiting for the store lock"
                        );
                        return Err(StoreError::LockTimeout(self.lock_timeout));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(TryLockError::Error(e)) => return Err(StoreError::io(&path, e)),
            }
        }

        tracing::trace!(dir = %self.dir.display(), "Acquired store lock");
        Ok(DiskStoreGuard {
            store: self,
            lock_file,
        })
    }
}

/// Lock guard of a [DiskStore]. Unlocks when dropped.
#[derive(Debug)]
pub struct DiskStoreGuard<'a> {
    store: &'a DiskStore,
    lock_file: File,
}

impl DiskStoreGuard<'_> {
    fn path(&self, name: &str) -> PathBuf {
        self.store.dir.join(name)
    }

    fn cursor_path(&self, range_set: &str) -> PathBuf {
        self.path(&format!("{CURSOR_FILE_PREFIX}{range_set}"))
    }

    /// Replaces the file `name` with `content`.
    fn write_atomic(&self, name: &str, content: &str) -> Result<(), StoreError> {
        let tmp = self.path(&format!(".{name}.tmp"));
        let target = self.path(name);

        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&tmp, e));
        }

        fs::rename(&tmp, &target).map_err(|e| StoreError::io(&target, e))?;
        self.sync_dir()
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Makes renames and removals in the directory durable.
    fn sync_dir(&self) -> Result<(), StoreError> {
        File::open(&self.store.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| StoreError::io(&self.store.dir, e))
    }
}

impl Drop for DiskStoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock_file.unlock() {
            // Closing the lock file right after releases the lock anyway.
            tracing::warn!(dir = %self.store.dir.display(), "Failed to unlock store: {e}");
        }
    }
}

impl LockedStore for DiskStoreGuard<'_> {
    fn reserve(
        &mut self,
        address: IpAddr,
        owner: &str,
        interface: &str,
    ) -> Result<bool, StoreError> {
        for (field, value) in [("owner", owner), ("interface", interface)] {
            if value.contains('\n') {
                return Err(StoreError::InvalidRecordField {
                    field,
                    value: value.to_string(),
                });
            }
        }

        let name = address.to_string();
        if let Some((holder, _)) = read_record(&self.path(&name))? {
            if holder == owner {
                return Ok(false);
            }
            return Err(StoreError::AlreadyReserved {
                address,
                owner: holder,
            });
        }

        self.write_atomic(&name, &format!("{owner}\n{interface}"))?;
        Ok(true)
    }

    fn release(&mut self, address: IpAddr) -> Result<bool, StoreError> {
        let removed = self.remove(&address.to_string())?;
        if removed {
            self.sync_dir()?;
        }
        Ok(removed)
    }

    fn release_by_owner(&mut self, owner: &str) -> Result<usize, StoreError> {
        let mut released = 0;
        for reservation in self.reservations()? {
            if reservation.owner == owner && self.remove(&reservation.address.to_string())? {
                released += 1;
            }
        }
        if released > 0 {
            self.sync_dir()?;
        }
        Ok(released)
    }

    fn reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let dir = &self.store.dir;
        let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut reservations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            // Lock, cursor and temporary files do not parse as addresses.
            let Some(address) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<IpAddr>().ok())
            else {
                continue;
            };
            if let Some((owner, interface)) = read_record(&entry.path())? {
                reservations.push(Reservation {
                    address,
                    owner,
                    interface,
                });
            }
        }
        reservations.sort();
        Ok(reservations)
    }

    fn cursor(&self, range_set: &str) -> Result<Option<IpAddr>, StoreError> {
        let path = self.cursor_path(range_set);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        match content.trim().parse() {
            Ok(address) => Ok(Some(address)),
            Err(e) => {
                // The cursor is only a hint, a broken one restarts the scan.
                tracing::warn!(path = %path.display(), "Ignoring unparsable cursor: {e}");
                Ok(None)
            }
        }
    }

    fn set_cursor(&mut self, range_set: &str, address: IpAddr) -> Result<(), StoreError> {
        let name = format!("{CURSOR_FILE_PREFIX}{range_set}");
        self.write_atomic(&name, &address.to_string())
    }
}

/// Reads a reservation record as `(owner, interface)`.
///
/// Both are kept byte for byte. A record without content has an empty owner, which
/// matches no caller. A record without a line break has no interface.
fn read_record(path: &Path) -> Result<Option<(String, String)>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let (owner, interface) = content.split_once('\n').unwrap_or((content.as_str(), ""));
            // Tolerate a trailing line break in hand-written records.
            let interface = interface.strip_suffix('\n').unwrap_or(interface);
            Ok(Some((owner.to_string(), interface.to_string())))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
