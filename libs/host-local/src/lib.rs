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
//! # Host-local IPAM
//!
//! Hands out IP addresses to container network interfaces from locally configured
//! ranges, without a central allocation server.
//!
//! A [range::RangeSet] describes the addresses that may be handed out. The
//! [allocator::Allocator] reserves them round-robin in a [store::Store], which keeps
//! reservations and the scan cursor and serializes concurrent callers. Many short-lived
//! processes can share a [store::disk::DiskStore]. Reservations of owners that are gone
//! are cleaned up by [sweep::sweep].
//!
//! [config::IpamConfig] reads the JSON configuration of a network and builds the range
//! sets, the store and the allocators from it.

pub mod allocator;
pub mod config;
pub mod range;
pub mod store;
pub mod sweep;
