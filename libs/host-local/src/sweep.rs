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
//! Garbage collection of reservations whose owners are gone.

use std::collections::BTreeSet;

use crate::store::{LockedStore, Reservation, Store, StoreError};

/// Outcome of a [sweep].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations that were released, sorted by address.
    pub pruned: Vec<Reservation>,
    /// Number of reservations that were kept.
    pub kept: usize,
}

/// Releases every reservation whose owner is not in `live_owners`.
///
/// Runs under the store lock. Cursors are left untouched.
pub fn sweep<S: Store>(
    store: &S,
    live_owners: &BTreeSet<String>,
) -> Result<SweepReport, StoreError> {
    let mut guard = store.lock()?;
    let mut report = SweepReport::default();

    for reservation in guard.reservations()? {
        if live_owners.contains(&reservation.owner) {
            report.kept += 1;
            continue;
        }
        if guard.release(reservation.address)? {
            tracing::info!(
                address = %reservation.address,
                owner = %reservation.owner,
                interface = %reservation.interface,
                "Pruned stale reservation"
            );
            report.pruned.push(reservation);
        }
    }

    tracing::debug!(pruned = report.pruned.len(), kept = report.kept, "Sweep done");
    Ok(report)
}
