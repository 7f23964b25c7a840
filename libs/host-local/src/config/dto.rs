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
//! Data transfer objects (DTOs) for the IPAM configuration.

use std::{net::IpAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{
    config::IpamConfig,
    range::{AddressRange, ExcludedRange, RangeSet},
    store::{
        StoreConfig,
        disk::{DEFAULT_DATA_DIR, DEFAULT_LOCK_TIMEOUT},
    },
};

/// The IPAM section of a network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamConfigDto {
    /// Name of the network.
    pub name: String,
    /// The range sets, each a list of ranges.
    pub ranges: Vec<Vec<RangeDto>>,
    /// Where reservations are kept.
    #[serde(default)]
    pub store: StoreConfigDto,
}

/// A single address range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDto {
    /// The subnet, in CIDR notation.
    pub subnet: String,
    /// First address handed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<String>,
    /// Last address handed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
    /// Gateway of the subnet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Excluded addresses: `a`, `a-b` or a CIDR prefix.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// Store selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StoreConfigDto {
    /// File based store.
    Disk {
        /// Root directory of the per-network directories.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_dir: Option<PathBuf>,
        /// Lock timeout in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lock_timeout_ms: Option<u64>,
    },
    /// In-memory store.
    Memory,
}

impl Default for StoreConfigDto {
    fn default() -> Self {
        Self::Disk {
            data_dir: None,
            lock_timeout_ms: None,
        }
    }
}

impl From<StoreConfigDto> for StoreConfig {
    fn from(value: StoreConfigDto) -> Self {
        match value {
            StoreConfigDto::Disk {
                data_dir,
                lock_timeout_ms,
            } => {
                StoreConfig::Disk {
                    data_dir: data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
                    lock_timeout: lock_timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(DEFAULT_LOCK_TIMEOUT),
                }
            }
            StoreConfigDto::Memory => StoreConfig::Memory,
        }
    }
}

impl TryFrom<RangeDto> for AddressRange {
    type Error = anyhow::Error;

    fn try_from(value: RangeDto) -> Result<Self, Self::Error> {
        let subnet: IpNet = value
            .subnet
            .parse()
            .with_context(|| format!("invalid subnet {:?}", value.subnet))?;

        let mut builder = AddressRange::builder(subnet);
        if let Some(start) = &value.range_start {
            builder = builder.with_range_start(parse_address("rangeStart", start)?);
        }
        if let Some(end) = &value.range_end {
            builder = builder.with_range_end(parse_address("rangeEnd", end)?);
        }
        if let Some(gateway) = &value.gateway {
            builder = builder.with_gateway(parse_address("gateway", gateway)?);
        }
        for exclusion in &value.exclude {
            builder = builder.with_exclusion(parse_exclusion(exclusion)?);
        }

        builder
            .build()
            .with_context(|| format!("invalid range in subnet {subnet}"))
    }
}

impl TryFrom<IpamConfigDto> for IpamConfig {
    type Error = anyhow::Error;

    fn try_from(value: IpamConfigDto) -> Result<Self, Self::Error> {
        let IpamConfigDto {
            name,
            ranges,
            store,
        } = value;
        anyhow::ensure!(!name.is_empty(), "network name must not be empty");
        anyhow::ensure!(!ranges.is_empty(), "no range sets configured");

        let range_sets = ranges
            .into_iter()
            .enumerate()
            .map(|(id, ranges)| -> anyhow::Result<RangeSet> {
                let ranges = ranges
                    .into_iter()
                    .map(AddressRange::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("invalid range set {id}"))?;
                Ok(RangeSet::new(name.as_str(), ranges)
                    .with_context(|| format!("invalid range set {id}"))?
                    .with_id(id.to_string()))
            })
            .collect::<Result<Vec<_>, Self::Error>>()?;

        for (i, a) in range_sets.iter().enumerate() {
            for b in &range_sets[i + 1..] {
                let overlapping = a
                    .ranges()
                    .iter()
                    .any(|x| b.ranges().iter().any(|y| x.overlaps(y)));
                anyhow::ensure!(
                    !overlapping,
                    "range sets {} and {} overlap",
                    a.id(),
                    b.id()
                );
            }
        }

        Ok(IpamConfig {
            network: name,
            range_sets,
            store: store.into(),
        })
    }
}

fn parse_address(field: &str, value: &str) -> anyhow::Result<IpAddr> {
    value
        .parse()
        .with_context(|| format!("invalid {field} {value:?}"))
}

/// Parses `a`, `a-b` or `prefix/len`.
fn parse_exclusion(value: &str) -> anyhow::Result<ExcludedRange> {
    if value.contains('/') {
        let prefix: IpNet = value
            .parse()
            .with_context(|| format!("invalid excluded prefix {value:?}"))?;
        return Ok(ExcludedRange::prefix(prefix));
    }
    match value.split_once('-') {
        Some((start, end)) => {
            Ok(ExcludedRange {
                start: parse_address("excluded range start", start.trim())?,
                end: parse_address("excluded range end", end.trim())?,
            })
        }
        None => Ok(ExcludedRange::single(parse_address("excluded address", value)?)),
    }
}
