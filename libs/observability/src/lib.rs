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
//! Logging setup for the host-local IPAM tools.
//!
//! IPAM plugins report their result on stdout, so log output never goes there: it is
//! written to stderr and, optionally, to a log file.

use std::{io::IsTerminal, path::Path};

use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt::time::UtcTime, prelude::*};

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Setup logging using the tracing library.
///
/// # Arguments
///
/// * `log_dir`: If provided, logs are written to a file that carries the name of the current
///   executable in this directory.
/// * `log_to_stderr`: If true, logs will additionally printed to stderr.
///
/// The returned guards flush the non-blocking writers when dropped and must be kept alive
/// for as long as logging is needed.
pub fn setup_tracing<P: AsRef<Path>>(
    log_dir: Option<P>,
    log_to_stderr: bool,
) -> Result<Vec<WorkerGuard>, SetGlobalDefaultError> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers = vec![];

    if let Some(log_dir) = log_dir {
        let log_file = tracing_appender::rolling::never(
            log_dir.as_ref(),
            format!("{}.log", extract_exec_name()),
        );
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(log_file);
        let file_logger = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking_writer)
            .with_filter(tracing::level_filters::LevelFilter::DEBUG);
        layers.push(file_logger.boxed());
        guards.push(file_guard);
    }

    if log_to_stderr {
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        let stderr_logger = tracing_subscriber::fmt::layer()
            // Enable colors if the stderr is a terminal.
            .with_ansi(std::io::stderr().is_terminal())
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking_writer)
            .with_filter(log_level);
        layers.push(stderr_logger.boxed());
        guards.push(guard);
    }

    let subscriber = Registry::default().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!("Logging initialized!");
    Ok(guards)
}

/// Name of the running executable, used as log file name.
fn extract_exec_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
