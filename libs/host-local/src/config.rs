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
//! Validated IPAM configuration of a network.
//!
//! The configuration is JSON:
//!
//! ```json
//! {
//!   "name": "mynet",
//!   "ranges": [
//!     [{ "subnet": "10.10.0.0/16", "rangeStart": "10.10.1.20", "exclude": ["10.10.1.30-10.10.1.39"] }],
//!     [{ "subnet": "2001:db8::/64" }]
//!   ],
//!   "store": { "type": "disk", "dataDir": "/var/lib/cni/networks", "lockTimeoutMs": 10000 }
//! }
//! ```

use std::{fs, path::Path};

use anyhow::Context;

use crate::{
    allocator::Allocator,
    config::dto::IpamConfigDto,
    range::RangeSet,
    store::{StoreBackend, StoreConfig, StoreError},
};

pub mod dto;

/// IPAM configuration of a single network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamConfig {
    pub(crate) network: String,
    pub(crate) range_sets: Vec<RangeSet>,
    pub(crate) store: StoreConfig,
}

impl IpamConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let dto: IpamConfigDto =
            serde_json::from_str(json).context("malformed IPAM configuration")?;
        dto.try_into()
    }

    /// Reads a JSON configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid configuration {}", path.display()))
    }

    /// Name of the network.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// The range sets, in configuration order.
    pub fn range_sets(&self) -> &[RangeSet] {
        &self.range_sets
    }

    /// The store configuration.
    pub fn store_config(&self) -> &StoreConfig {
        &self.store
    }

    /// Opens the network's store.
    pub fn open_store(&self) -> Result<StoreBackend, StoreError> {
        self.store.open(&self.network)
    }

    /// One allocator per range set, all sharing the network's store.
    pub fn allocators(&self) -> Result<Vec<Allocator<StoreBackend>>, StoreError> {
        let store = self.open_store()?;
        Ok(self
            .range_sets
            .iter()
            .map(|set| Allocator::new(set.clone(), store.clone()))
            .collect())
    }
}
