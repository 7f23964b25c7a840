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
//! host-local-admin CLI options.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Inspect and clean up host-local IPAM stores.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Top-level subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log to stderr.
    #[arg(long, global = true, action = ArgAction::Set, default_value_t = true)]
    pub stderr: bool,

    /// Directory for the log file.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the reservations and cursors of a network.
    Show {
        /// The IPAM configuration of the network.
        #[arg(long)]
        config: PathBuf,
    },
    /// Release the reservations of owners that no longer exist.
    Gc {
        /// The IPAM configuration of the network.
        #[arg(long)]
        config: PathBuf,

        /// An owner that is still alive. May be repeated.
        #[arg(long = "live", value_name = "OWNER")]
        live: Vec<String>,

        /// File listing live owners, one per line. Empty lines and lines starting with
        /// `#` are ignored.
        #[arg(long)]
        live_file: Option<PathBuf>,

        /// Allow an empty set of live owners, which releases every reservation.
        #[arg(long)]
        allow_empty: bool,
    },
    /// Release every reservation of an owner.
    Release {
        /// The IPAM configuration of the network.
        #[arg(long)]
        config: PathBuf,

        /// The owner, usually a container ID.
        #[arg(long)]
        owner: String,

        /// The interface the addresses were reserved for.
        #[arg(long, default_value = "eth0")]
        interface: String,
    },
}
