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
//! Address ranges and the allocation ring built from them.
//!
//! An [AddressRange] describes one subnet (optionally narrowed by a start and end address)
//! together with its gateway and excluded sub-ranges. A [RangeSet] strings a number of
//! ranges together into a single ring that is scanned round-robin by the allocator.

use core::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use host_local_utils::rangeset::{Range, RangeSet as IntervalSet};
use ipnet::IpNet;
use thiserror::Error;

/// Identifier used for range sets that were not given one explicitly.
pub const DEFAULT_RANGE_SET_ID: &str = "0";

/// Range configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// The range set has no ranges.
    #[error("range set contains no ranges")]
    NoRanges,
    /// The subnet has no host addresses.
    #[error("subnet {0} is too small to allocate from")]
    SubnetTooSmall(IpNet),
    /// The subnet reaches the highest address of the address space.
    #[error("subnet {0} ends at the highest address and is not supported")]
    UnsupportedSubnet(IpNet),
    /// A configured address lies outside the subnet's host addresses.
    #[error("{field} {address} is not a host address of subnet {subnet}")]
    AddressNotInSubnet {
        /// The configuration field the address came from.
        field: &'static str,
        /// The offending address.
        address: IpAddr,
        /// The subnet of the range.
        subnet: IpNet,
    },
    /// A gateway or exclusion lies outside of range start and range end.
    #[error("{field} {address} is outside of range {start}-{end}")]
    AddressOutOfRange {
        /// The configuration field the address came from.
        field: &'static str,
        /// The offending address.
        address: IpAddr,
        /// Configured start.
        start: IpAddr,
        /// Configured end.
        end: IpAddr,
    },
    /// Range start after range end.
    #[error("range start {start} is after range end {end}")]
    InvertedRange {
        /// Configured start.
        start: IpAddr,
        /// Configured end.
        end: IpAddr,
    },
    /// Excluded interval with start after end.
    #[error("excluded range {start}-{end} is reversed")]
    InvertedExclusion {
        /// Start of the exclusion.
        start: IpAddr,
        /// End of the exclusion.
        end: IpAddr,
    },
    /// The ranges of a set mix IPv4 and IPv6.
    #[error("subnet {0} does not match the address family of the range set")]
    MixedFamilies(IpNet),
    /// Two ranges of a set overlap.
    #[error("range {0} overlaps range {1}")]
    Overlapping(String, String),
    /// Every address of the set is reserved or excluded.
    #[error("range set {0} has no usable addresses")]
    NoUsableAddresses(String),
}

/// An inclusive interval of addresses excluded from allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcludedRange {
    /// First excluded address.
    pub start: IpAddr,
    /// Last excluded address.
    pub end: IpAddr,
}

impl ExcludedRange {
    /// Excludes a single address.
    pub fn single(address: IpAddr) -> Self {
        Self {
            start: address,
            end: address,
        }
    }

    /// Excludes every address of a prefix, including its network and broadcast address.
    pub fn prefix(prefix: IpNet) -> Self {
        Self {
            start: prefix.network(),
            end: prefix.broadcast(),
        }
    }
}

impl fmt::Display for ExcludedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A single allocation range within a subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    subnet: IpNet,
    range_start: IpAddr,
    range_end: IpAddr,
    gateway: IpAddr,
    explicit_gateway: bool,
    excluded: Vec<ExcludedRange>,
    /// Addresses that may be handed out: `[range_start, range_end]` minus the gateway and
    /// the exclusions.
    usable: IntervalSet<u128>,
}

/// Builder for [AddressRange].
#[derive(Debug, Clone)]
pub struct AddressRangeBuilder {
    subnet: IpNet,
    range_start: Option<IpAddr>,
    range_end: Option<IpAddr>,
    gateway: Option<IpAddr>,
    excluded: Vec<ExcludedRange>,
}

impl AddressRangeBuilder {
    /// Narrows the range to start at the given address.
    pub fn with_range_start(mut self, start: IpAddr) -> Self {
        self.range_start = Some(start);
        self
    }

    /// Narrows the range to end at the given address (inclusive).
    pub fn with_range_end(mut self, end: IpAddr) -> Self {
        self.range_end = Some(end);
        self
    }

    /// Sets an explicit gateway. Without one, the range start is reserved as the gateway.
    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Excludes an interval of addresses from allocation.
    pub fn with_exclusion(mut self, exclusion: ExcludedRange) -> Self {
        self.excluded.push(exclusion);
        self
    }

    /// Validates the configuration and builds the range.
    pub fn build(self) -> Result<AddressRange, RangeError> {
        let subnet = self.subnet.trunc();
        let (first_host, last_host) = host_bounds(&subnet)?;
        let is_host = |address: IpAddr| {
            subnet.contains(&address)
                && (first_host..=last_host).contains(&to_bits(address))
        };
        let check_host = |field: &'static str, address: IpAddr| {
            if is_host(address) {
                Ok(address)
            } else {
                Err(RangeError::AddressNotInSubnet {
                    field,
                    address,
                    subnet,
                })
            }
        };

        let first = from_bits(first_host, subnet.network().is_ipv4());
        let last = from_bits(last_host, subnet.network().is_ipv4());
        let range_start = check_host("range start", self.range_start.unwrap_or(first))?;
        let range_end = check_host("range end", self.range_end.unwrap_or(last))?;
        if to_bits(range_start) > to_bits(range_end) {
            return Err(RangeError::InvertedRange {
                start: range_start,
                end: range_end,
            });
        }

        let check_in_range = |field: &'static str, address: IpAddr| {
            let bits = to_bits(address);
            if address.is_ipv4() == range_start.is_ipv4()
                && (to_bits(range_start)..=to_bits(range_end)).contains(&bits)
            {
                Ok(address)
            } else {
                Err(RangeError::AddressOutOfRange {
                    field,
                    address,
                    start: range_start,
                    end: range_end,
                })
            }
        };

        let explicit_gateway = self.gateway.is_some();
        let gateway = check_in_range("gateway", self.gateway.unwrap_or(range_start))?;

        let mut usable = IntervalSet::new(vec![Range::new(
            to_bits(range_start),
            to_bits(range_end) + 1,
        )])
        .map_err(|_| {
            RangeError::InvertedRange {
                start: range_start,
                end: range_end,
            }
        })?;
        usable.remove_range(to_bits(gateway), to_bits(gateway) + 1);

        for exclusion in &self.excluded {
            let start = to_bits(check_in_range("excluded address", exclusion.start)?);
            let end = to_bits(check_in_range("excluded address", exclusion.end)?);
            if start > end {
                return Err(RangeError::InvertedExclusion {
                    start: exclusion.start,
                    end: exclusion.end,
                });
            }
            usable.remove_range(start, end + 1);
        }

        Ok(AddressRange {
            subnet,
            range_start,
            range_end,
            gateway,
            explicit_gateway,
            excluded: self.excluded,
            usable,
        })
    }
}

impl AddressRange {
    /// Starts building a range over the given subnet.
    pub fn builder(subnet: IpNet) -> AddressRangeBuilder {
        AddressRangeBuilder {
            subnet,
            range_start: None,
            range_end: None,
            gateway: None,
            excluded: Vec::new(),
        }
    }

    /// A range spanning all host addresses of the subnet, with the implicit gateway.
    pub fn new(subnet: IpNet) -> Result<Self, RangeError> {
        Self::builder(subnet).build()
    }

    /// The subnet of this range.
    pub fn subnet(&self) -> IpNet {
        self.subnet
    }

    /// First address of the range (inclusive).
    pub fn range_start(&self) -> IpAddr {
        self.range_start
    }

    /// Last address of the range (inclusive).
    pub fn range_end(&self) -> IpAddr {
        self.range_end
    }

    /// The gateway of this range, either configured or implicit.
    pub fn gateway(&self) -> IpAddr {
        self.gateway
    }

    /// Whether the gateway was configured explicitly.
    pub fn has_explicit_gateway(&self) -> bool {
        self.explicit_gateway
    }

    /// The configured exclusions.
    pub fn excluded(&self) -> &[ExcludedRange] {
        &self.excluded
    }

    /// Whether the address may be handed out from this range.
    pub fn contains(&self, address: IpAddr) -> bool {
        self.same_family(address) && self.usable.contains(to_bits(address))
    }

    /// Whether the address lies between range start and range end, usable or not.
    pub fn in_bounds(&self, address: IpAddr) -> bool {
        self.same_family(address)
            && (to_bits(self.range_start)..=to_bits(self.range_end)).contains(&to_bits(address))
    }

    /// Whether the bounds of the two ranges intersect.
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.in_bounds(other.range_start)
            || self.in_bounds(other.range_end)
            || other.in_bounds(self.range_start)
    }

    /// Number of addresses that may be handed out from this range.
    pub fn usable_count(&self) -> u128 {
        self.usable.len()
    }

    fn is_ipv4(&self) -> bool {
        self.subnet.network().is_ipv4()
    }

    fn same_family(&self, address: IpAddr) -> bool {
        address.is_ipv4() == self.is_ipv4()
    }

    fn address(&self, bits: u128) -> IpAddr {
        from_bits(bits, self.is_ipv4())
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}-{}]",
            self.subnet, self.range_start, self.range_end
        )
    }
}

/// An ordered set of address ranges that is scanned as one ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    network: String,
    id: String,
    ranges: Vec<AddressRange>,
}

impl RangeSet {
    /// Creates a range set for the given network.
    ///
    /// The ranges must share one address family and must not overlap. Their order is the
    /// order in which the allocator scans them.
    pub fn new(network: impl Into<String>, ranges: Vec<AddressRange>) -> Result<Self, RangeError> {
        let network = network.into();
        let Some(first) = ranges.first() else {
            return Err(RangeError::NoRanges);
        };

        let ipv4 = first.is_ipv4();
        if let Some(mixed) = ranges.iter().find(|range| range.is_ipv4() != ipv4) {
            return Err(RangeError::MixedFamilies(mixed.subnet));
        }

        for (i, a) in ranges.iter().enumerate() {
            if let Some(b) = ranges[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(RangeError::Overlapping(a.to_string(), b.to_string()));
            }
        }

        if ranges.iter().all(|range| range.usable.is_empty()) {
            return Err(RangeError::NoUsableAddresses(network));
        }

        Ok(Self {
            network,
            id: DEFAULT_RANGE_SET_ID.to_string(),
            ranges,
        })
    }

    /// Sets the identifier under which the store keeps this set's cursor.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Name of the network this set belongs to.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Identifier of this set within its network.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The ranges in scan order.
    pub fn ranges(&self) -> &[AddressRange] {
        &self.ranges
    }

    /// Total number of addresses that may be handed out.
    pub fn usable_count(&self) -> u128 {
        self.ranges.iter().map(AddressRange::usable_count).sum()
    }

    /// Whether the address may be handed out from any range of the set.
    pub fn contains(&self, address: IpAddr) -> bool {
        self.range_containing(address).is_some()
    }

    /// The range that may hand out the given address.
    pub fn range_containing(&self, address: IpAddr) -> Option<&AddressRange> {
        self.ranges.iter().find(|range| range.contains(address))
    }

    /// Whether the address is the gateway of any range in the set.
    pub fn is_gateway(&self, address: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.gateway == address)
    }

    /// Returns every usable address in ring order, starting strictly after `cursor`.
    ///
    /// Scanning starts at the first usable address of the first range if there is no
    /// cursor, or if the cursor lies outside of every range. Past the last usable address
    /// of a range the scan continues in the next range, past the last range it wraps
    /// around to the first. Every usable address is yielded exactly once.
    pub fn candidates_from(&self, cursor: Option<IpAddr>) -> Candidates<'_> {
        let start = cursor
            .and_then(|cursor| self.position_after(cursor))
            .or_else(|| self.first_position_from(0));
        Candidates {
            set: self,
            next: start,
            remaining: self.usable_count(),
        }
    }

    fn position_after(&self, cursor: IpAddr) -> Option<(usize, u128)> {
        let idx = self.ranges.iter().position(|range| range.in_bounds(cursor))?;
        match self.ranges[idx].usable.next_after(to_bits(cursor)) {
            Some(bits) => Some((idx, bits)),
            None => self.first_position_from(idx + 1),
        }
    }

    /// First usable address of the first non-empty range at or after `idx`, wrapping.
    fn first_position_from(&self, idx: usize) -> Option<(usize, u128)> {
        let len = self.ranges.len();
        (0..len)
            .map(|offset| (idx + offset) % len)
            .find_map(|i| self.ranges[i].usable.first().map(|bits| (i, bits)))
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: ", self.network, self.id)?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

/// Lazy walk over the usable addresses of a [RangeSet], see [RangeSet::candidates_from].
#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    set: &'a RangeSet,
    next: Option<(usize, u128)>,
    remaining: u128,
}

impl Iterator for Candidates<'_> {
    type Item = IpAddr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (idx, bits) = self.next?;
        self.remaining -= 1;

        let range = &self.set.ranges[idx];
        self.next = match range.usable.next_after(bits) {
            Some(following) => Some((idx, following)),
            None => self.set.first_position_from(idx + 1),
        };
        Some(range.address(bits))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Host addresses of a subnet as an inclusive interval.
fn host_bounds(subnet: &IpNet) -> Result<(u128, u128), RangeError> {
    let network = to_bits(subnet.network());
    let last = to_bits(subnet.broadcast());
    match subnet {
        // Network and broadcast address are never handed out.
        IpNet::V4(net) if net.prefix_len() <= 30 => Ok((network + 1, last - 1)),
        IpNet::V6(net) if net.prefix_len() < 128 => {
            if last == u128::MAX {
                return Err(RangeError::UnsupportedSubnet(*subnet));
            }
            Ok((network + 1, last))
        }
        _ => Err(RangeError::SubnetTooSmall(*subnet)),
    }
}

/// Maps an address into a single integer space, IPv4 addresses as IPv4-mapped IPv6.
pub(crate) fn to_bits(address: IpAddr) -> u128 {
    match address {
        IpAddr::V4(addr) => addr.to_ipv6_mapped().to_bits(),
        IpAddr::V6(addr) => addr.to_bits(),
    }
}

fn from_bits(bits: u128, ipv4: bool) -> IpAddr {
    if ipv4 {
        // The IPv4 address is held in the low 32 bits of the mapped form.
        IpAddr::V4(Ipv4Addr::from_bits(bits as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from_bits(bits))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn ip(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    fn net(s: &str) -> IpNet {
        IpNet::from_str(s).unwrap()
    }

    fn set(ranges: Vec<AddressRange>) -> RangeSet {
        RangeSet::new("test", ranges).unwrap()
    }

    fn walk(set: &RangeSet, cursor: Option<&str>) -> Vec<String> {
        set.candidates_from(cursor.map(ip))
            .map(|addr| addr.to_string())
            .collect()
    }

    #[test]
    fn should_skip_network_broadcast_and_implicit_gateway() {
        let range = AddressRange::new(net("10.0.0.0/29")).unwrap();
        assert_eq!(range.gateway(), ip("10.0.0.1"));
        assert!(!range.has_explicit_gateway());
        assert_eq!(range.range_start(), ip("10.0.0.1"));
        assert_eq!(range.range_end(), ip("10.0.0.6"));
        assert_eq!(range.usable_count(), 5);

        for addr in ["10.0.0.0", "10.0.0.1", "10.0.0.7", "10.0.0.8"] {
            assert!(!range.contains(ip(addr)), "{addr} must not be usable");
        }
        for addr in ["10.0.0.2", "10.0.0.6"] {
            assert!(range.contains(ip(addr)), "{addr} must be usable");
        }
        // Wrong family never matches.
        assert!(!range.contains(ip("::ffff:10.0.0.2")));
    }

    #[test]
    fn should_normalize_subnet_with_host_bits() {
        let range = AddressRange::new(net("10.0.0.5/29")).unwrap();
        assert_eq!(range.subnet(), net("10.0.0.0/29"));
    }

    #[test]
    fn should_remove_explicit_gateway_and_exclusions() {
        let range = AddressRange::builder(net("192.168.1.0/24"))
            .with_range_start(ip("192.168.1.10"))
            .with_range_end(ip("192.168.1.20"))
            .with_gateway(ip("192.168.1.15"))
            .with_exclusion(ExcludedRange::single(ip("192.168.1.12")))
            .with_exclusion(ExcludedRange {
                start: ip("192.168.1.17"),
                end: ip("192.168.1.18"),
            })
            .build()
            .unwrap();

        assert!(range.has_explicit_gateway());
        let set = set(vec![range]);
        assert_eq!(
            walk(&set, None),
            [
                "192.168.1.10",
                "192.168.1.11",
                "192.168.1.13",
                "192.168.1.14",
                "192.168.1.16",
                "192.168.1.19",
                "192.168.1.20"
            ]
        );
    }

    #[test]
    fn should_keep_first_address_when_gateway_is_elsewhere() {
        let range = AddressRange::builder(net("10.0.0.0/29"))
            .with_gateway(ip("10.0.0.6"))
            .build()
            .unwrap();
        let set = set(vec![range]);
        assert_eq!(
            walk(&set, None),
            ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"]
        );
    }

    #[test]
    fn should_reject_invalid_ranges() {
        assert_eq!(
            AddressRange::new(net("10.0.0.0/31")),
            Err(RangeError::SubnetTooSmall(net("10.0.0.0/31")))
        );
        assert_eq!(
            AddressRange::new(net("2001:db8::1/128")),
            Err(RangeError::SubnetTooSmall(net("2001:db8::1/128")))
        );
        assert_eq!(
            AddressRange::new(net("ffff::/16")),
            Err(RangeError::UnsupportedSubnet(net("ffff::/16")))
        );
        assert_eq!(
            AddressRange::builder(net("10.0.0.0/29"))
                .with_range_start(ip("10.0.0.7"))
                .build(),
            Err(RangeError::AddressNotInSubnet {
                field: "range start",
                address: ip("10.0.0.7"),
                subnet: net("10.0.0.0/29"),
            })
        );
        assert_eq!(
            AddressRange::builder(net("10.0.0.0/29"))
                .with_range_start(ip("10.0.0.5"))
                .with_range_end(ip("10.0.0.3"))
                .build(),
            Err(RangeError::InvertedRange {
                start: ip("10.0.0.5"),
                end: ip("10.0.0.3"),
            })
        );
        assert_eq!(
            AddressRange::builder(net("10.0.0.0/29"))
                .with_gateway(ip("10.0.1.1"))
                .build(),
            Err(RangeError::AddressOutOfRange {
                field: "gateway",
                address: ip("10.0.1.1"),
                start: ip("10.0.0.1"),
                end: ip("10.0.0.6"),
            })
        );
        assert_eq!(
            AddressRange::builder(net("10.0.0.0/29"))
                .with_exclusion(ExcludedRange {
                    start: ip("10.0.0.2"),
                    end: ip("10.0.0.9"),
                })
                .build(),
            Err(RangeError::AddressOutOfRange {
                field: "excluded address",
                address: ip("10.0.0.9"),
                start: ip("10.0.0.1"),
                end: ip("10.0.0.6"),
            })
        );
        assert_eq!(
            AddressRange::builder(net("10.0.0.0/29"))
                .with_exclusion(ExcludedRange {
                    start: ip("10.0.0.4"),
                    end: ip("10.0.0.2"),
                })
                .build(),
            Err(RangeError::InvertedExclusion {
                start: ip("10.0.0.4"),
                end: ip("10.0.0.2"),
            })
        );
    }

    #[test]
    fn should_reject_gateway_and_exclusions_outside_narrowed_range() {
        let narrowed = || {
            AddressRange::builder(net("10.0.0.0/24"))
                .with_range_start(ip("10.0.0.10"))
                .with_range_end(ip("10.0.0.20"))
        };
        let out_of_range = |field: &'static str, address: &str| -> Result<AddressRange, RangeError> {
            Err(RangeError::AddressOutOfRange {
                field,
                address: ip(address),
                start: ip("10.0.0.10"),
                end: ip("10.0.0.20"),
            })
        };

        // Inside the subnet but outside of the range.
        assert_eq!(
            narrowed().with_gateway(ip("10.0.0.200")).build(),
            out_of_range("gateway", "10.0.0.200")
        );
        assert_eq!(
            narrowed().with_gateway(ip("10.0.0.1")).build(),
            out_of_range("gateway", "10.0.0.1")
        );
        assert_eq!(
            narrowed()
                .with_exclusion(ExcludedRange::single(ip("10.0.0.9")))
                .build(),
            out_of_range("excluded address", "10.0.0.9")
        );
        assert_eq!(
            narrowed()
                .with_exclusion(ExcludedRange {
                    start: ip("10.0.0.18"),
                    end: ip("10.0.0.21"),
                })
                .build(),
            out_of_range("excluded address", "10.0.0.21")
        );
        // The IPv4-mapped form of an address in range is a different family.
        assert_eq!(
            narrowed().with_gateway(ip("::ffff:10.0.0.15")).build(),
            out_of_range("gateway", "::ffff:10.0.0.15")
        );
        // Both bounds are valid.
        assert!(
            narrowed()
                .with_gateway(ip("10.0.0.20"))
                .with_exclusion(ExcludedRange {
                    start: ip("10.0.0.10"),
                    end: ip("10.0.0.12"),
                })
                .build()
                .is_ok()
        );
    }

    #[test]
    fn should_reject_invalid_range_sets() {
        assert_eq!(RangeSet::new("test", vec![]), Err(RangeError::NoRanges));

        let v4 = AddressRange::new(net("10.0.0.0/24")).unwrap();
        let v6 = AddressRange::new(net("2001:db8::/64")).unwrap();
        assert_eq!(
            RangeSet::new("test", vec![v4.clone(), v6]),
            Err(RangeError::MixedFamilies(net("2001:db8::/64")))
        );

        let inner = AddressRange::builder(net("10.0.0.0/24"))
            .with_range_start(ip("10.0.0.100"))
            .with_range_end(ip("10.0.0.110"))
            .build()
            .unwrap();
        assert_matches::assert_matches!(
            RangeSet::new("test", vec![inner, v4]),
            Err(RangeError::Overlapping(_, _))
        );

        let all_excluded = AddressRange::builder(net("10.0.0.0/30"))
            .with_exclusion(ExcludedRange::single(ip("10.0.0.2")))
            .build()
            .unwrap();
        assert_eq!(
            RangeSet::new("test", vec![all_excluded]),
            Err(RangeError::NoUsableAddresses("test".to_string()))
        );
    }

    #[test]
    fn should_walk_ring_from_cursor() {
        let set = set(vec![AddressRange::new(net("10.0.0.0/29")).unwrap()]);
        let all = ["10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "10.0.0.6"];

        // No cursor, out of range cursor, broadcast and network address.
        for cursor in [None, Some("10.0.0.128"), Some("10.0.0.7"), Some("10.0.0.0")] {
            assert_eq!(walk(&set, cursor), all, "cursor {cursor:?}");
        }
        // The last candidate wraps to the first.
        assert_eq!(walk(&set, Some("10.0.0.6")), all);
        // The implicit gateway is in bounds and continues right after it.
        assert_eq!(walk(&set, Some("10.0.0.1")), all);
        // Anywhere else the scan starts after the cursor and visits the cursor last.
        assert_eq!(
            walk(&set, Some("10.0.0.4")),
            ["10.0.0.5", "10.0.0.6", "10.0.0.2", "10.0.0.3", "10.0.0.4"]
        );
        // A cursor of the wrong family is out of bounds.
        assert_eq!(walk(&set, Some("2001:db8::4")), all);
    }

    #[test]
    fn should_continue_in_next_range_and_wrap_to_first() {
        let first = AddressRange::builder(net("10.0.0.0/24"))
            .with_range_start(ip("10.0.0.10"))
            .with_range_end(ip("10.0.0.13"))
            .build()
            .unwrap();
        let second = AddressRange::builder(net("10.0.1.0/24"))
            .with_range_start(ip("10.0.1.10"))
            .with_range_end(ip("10.0.1.12"))
            .build()
            .unwrap();
        let set = set(vec![first, second]);
        assert_eq!(set.usable_count(), 5);

        assert_eq!(
            walk(&set, Some("10.0.0.12")),
            ["10.0.0.13", "10.0.1.11", "10.0.1.12", "10.0.0.11", "10.0.0.12"]
        );
        assert_eq!(
            walk(&set, Some("10.0.0.13")),
            ["10.0.1.11", "10.0.1.12", "10.0.0.11", "10.0.0.12", "10.0.0.13"]
        );
        assert_eq!(
            walk(&set, Some("10.0.1.12")),
            ["10.0.0.11", "10.0.0.12", "10.0.0.13", "10.0.1.11", "10.0.1.12"]
        );
        // Between the two ranges is outside of the set.
        assert_eq!(
            walk(&set, Some("10.0.0.200")),
            ["10.0.0.11", "10.0.0.12", "10.0.0.13", "10.0.1.11", "10.0.1.12"]
        );
        // The implicit gateway of the second range continues right after it.
        assert_eq!(
            walk(&set, Some("10.0.1.10")),
            ["10.0.1.11", "10.0.1.12", "10.0.0.11", "10.0.0.12", "10.0.0.13"]
        );
    }

    #[test]
    fn should_skip_fully_excluded_range_in_ring() {
        let first = AddressRange::builder(net("10.0.0.0/29"))
            .with_range_start(ip("10.0.0.2"))
            .with_range_end(ip("10.0.0.4"))
            .build()
            .unwrap();
        let empty = AddressRange::builder(net("10.0.1.0/29"))
            .with_exclusion(ExcludedRange {
                start: ip("10.0.1.2"),
                end: ip("10.0.1.6"),
            })
            .build()
            .unwrap();
        let last = AddressRange::builder(net("10.0.2.0/29"))
            .with_range_start(ip("10.0.2.4"))
            .build()
            .unwrap();
        let set = set(vec![first, empty, last]);
        assert_eq!(
            walk(&set, Some("10.0.1.3")),
            ["10.0.2.5", "10.0.2.6", "10.0.0.3", "10.0.0.4"]
        );
        assert_eq!(
            walk(&set, Some("10.0.0.4")),
            ["10.0.2.5", "10.0.2.6", "10.0.0.3", "10.0.0.4"]
        );
    }

    #[test]
    fn should_reserve_range_start_as_implicit_gateway() {
        let range = AddressRange::builder(net("10.0.0.0/24"))
            .with_range_start(ip("10.0.0.10"))
            .with_range_end(ip("10.0.0.20"))
            .build()
            .unwrap();
        assert_eq!(range.gateway(), ip("10.0.0.10"));
        assert!(!range.has_explicit_gateway());
        assert_eq!(range.usable_count(), 10);
        assert!(!range.contains(ip("10.0.0.10")));
        assert!(!range.contains(ip("10.0.0.1")));

        let set = set(vec![range]);
        assert!(set.is_gateway(ip("10.0.0.10")));
        assert!(!set.is_gateway(ip("10.0.0.1")));
        assert_eq!(set.candidates_from(None).next(), Some(ip("10.0.0.11")));
    }

    #[test]
    fn should_walk_ipv6_ranges() {
        let range = AddressRange::builder(net("2001:db8::/64"))
            .with_range_end(ip("2001:db8::4"))
            .build()
            .unwrap();
        let set = set(vec![range]);
        assert_eq!(set.ranges()[0].gateway(), ip("2001:db8::1"));
        assert_eq!(
            walk(&set, Some("2001:db8::3")),
            ["2001:db8::4", "2001:db8::2", "2001:db8::3"]
        );

        // Huge ranges are walked lazily.
        let big = set_of(net("2001:db8::/64"));
        assert_eq!(big.usable_count(), (1u128 << 64) - 2);
        let first: Vec<_> = big.candidates_from(None).take(2).collect();
        assert_eq!(first, [ip("2001:db8::2"), ip("2001:db8::3")]);
        let wrapped: Vec<_> = big
            .candidates_from(Some(ip("2001:db8::ffff:ffff:ffff:ffff")))
            .take(1)
            .collect();
        assert_eq!(wrapped, [ip("2001:db8::2")]);
    }

    fn set_of(subnet: IpNet) -> RangeSet {
        set(vec![AddressRange::new(subnet).unwrap()])
    }

    #[test]
    fn should_yield_every_usable_address_exactly_once() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let mut builder = AddressRange::builder(net("172.16.0.0/26"));
            for _ in 0..rng.random_range(0..4) {
                let start = rng.random_range(1..60u8);
                let end = start + rng.random_range(0..4u8);
                builder = builder.with_exclusion(ExcludedRange {
                    start: IpAddr::V4(Ipv4Addr::new(172, 16, 0, start)),
                    end: IpAddr::V4(Ipv4Addr::new(172, 16, 0, end)),
                });
            }
            let set = set(vec![builder.build().unwrap()]);
            let cursor = IpAddr::V4(Ipv4Addr::new(172, 16, 0, rng.random_range(0..=255u8)));

            let walked: Vec<_> = set.candidates_from(Some(cursor)).collect();
            assert_eq!(walked.len() as u128, set.usable_count());

            let mut unique = walked.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), walked.len(), "duplicate candidates: {walked:?}");
            assert!(walked.iter().all(|addr| set.contains(*addr)));
        }
    }
}
