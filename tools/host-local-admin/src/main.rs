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
//! Operator tool for host-local IPAM stores.

use std::{
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::Path,
};

use anyhow::{Context, bail};
use clap::Parser;
use host_local_ipam::{
    config::IpamConfig,
    store::{LockedStore, Store},
    sweep::sweep,
};
use host_local_observability::setup_tracing;

use crate::cli::{Commands, Opts};

mod cli;

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guards = setup_tracing(opts.logging.log_dir.as_ref(), opts.logging.stderr)
        .context("failed to set up logging")?;

    let mut out = io::stdout().lock();
    match opts.command {
        Commands::Show { config } => show(&IpamConfig::load(config)?, &mut out),
        Commands::Gc {
            config,
            live,
            live_file,
            allow_empty,
        } => {
            let mut live: BTreeSet<String> = live.into_iter().collect();
            if let Some(path) = live_file {
                live.extend(read_live_file(&path)?);
            }
            if live.is_empty() && !allow_empty {
                bail!("no live owners given, pass --allow-empty to release every reservation");
            }
            gc(&IpamConfig::load(config)?, &live, &mut out)
        }
        Commands::Release {
            config,
            owner,
            interface,
        } => release(&IpamConfig::load(config)?, &owner, &interface, &mut out),
    }
}

/// Prints the range sets with their cursors, followed by all reservations.
fn show(config: &IpamConfig, out: &mut impl Write) -> anyhow::Result<()> {
    let store = config.open_store()?;
    let guard = store.lock()?;

    writeln!(out, "network {}", config.network())?;
    for set in config.range_sets() {
        match guard.cursor(set.id())? {
            Some(cursor) => writeln!(out, "range set {set} (cursor {cursor})")?,
            None => writeln!(out, "range set {set} (no cursor)")?,
        }
    }
    for reservation in guard.reservations()? {
        writeln!(
            out,
            "{}\t{}\t{}",
            reservation.address, reservation.owner, reservation.interface
        )?;
    }
    Ok(())
}

fn gc(config: &IpamConfig, live: &BTreeSet<String>, out: &mut impl Write) -> anyhow::Result<()> {
    let store = config.open_store()?;
    let report = sweep(&store, live)
        .with_context(|| format!("failed to sweep network {}", config.network()))?;

    for reservation in &report.pruned {
        writeln!(
            out,
            "released {}\t{}\t{}",
            reservation.address, reservation.owner, reservation.interface
        )?;
    }
    writeln!(
        out,
        "{} released, {} kept",
        report.pruned.len(),
        report.kept
    )?;
    Ok(())
}

fn release(
    config: &IpamConfig,
    owner: &str,
    interface: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut released = 0;
    for allocator in config.allocators()? {
        released += allocator.release(owner, interface)?;
    }
    writeln!(out, "{released} released")?;
    Ok(())
}

/// Reads owner IDs, one per line.
fn read_live_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read live owners from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
