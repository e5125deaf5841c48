// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

/// Name of the environment variable containing the log directory and file respectively.
/// If both are provided, an error is thrown.
/// If neither is provided, no logging to files is performed.
pub const LOG_DIR_ENV: &str = "CROS_BUILDTOOLS_LOG_DIR";
pub const LOG_FILE_ENV: &str = "CROS_BUILDTOOLS_LOG_FILE";

/// An environment variable choosing whether to log to the console.
/// If "0", don't log to the console.
/// Otherwise, do log to the console.
pub const CONSOLE_LOG_ENV: &str = "CROS_BUILDTOOLS_LOG_CONSOLE";

/// A guard object to perform cleanups with RAII.
pub struct LogGuard {
    _span_guard: tracing::span::EnteredSpan,
}

/// The configuration for the logger.
pub struct LoggingConfig {
    /// The path to dump the logs to, and a filter for which logs should be dumped there.
    /// If None, logs will not be written to a file.
    pub log_file: Option<(PathBuf, EnvFilter)>,
    /// A filter for which logs should be written to the console.
    /// If None, logs will not be written to the console.
    pub console_logger: Option<EnvFilter>,
}

fn default_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?)
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_nanos();

        let log_file = match (
            std::env::var_os(LOG_FILE_ENV),
            std::env::var_os(LOG_DIR_ENV),
        ) {
            (Some(_), Some(_)) => bail!("You can't have both {LOG_FILE_ENV} and {LOG_DIR_ENV} set"),
            // Subprocesses shouldn't share a log file.
            (Some(file), None) => {
                std::env::remove_var(LOG_FILE_ENV);
                Some(PathBuf::from(file))
            }
            (None, Some(dir)) => {
                let name = format!("{}.{timestamp}.log", crate::get_current_process_name());
                Some(Path::new(&dir).join(name))
            }
            (None, None) => None,
        };

        let console_logger = match std::env::var(CONSOLE_LOG_ENV).ok().as_deref() {
            Some("0") => None,
            _ => Some(default_filter()?),
        };

        let log_file = match log_file {
            Some(log_file) => Some((log_file, default_filter()?)),
            None => None,
        };

        Ok(Self {
            log_file,
            console_logger,
        })
    }

    /// Installs the global tracing subscriber and enters a span named "main".
    pub fn setup(self) -> Result<LogGuard> {
        let mut layers = Vec::new();

        if let Some(filter) = self.console_logger {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        if let Some((log_file, filter)) = self.log_file {
            let f = std::fs::File::create(&log_file)
                .with_context(|| format!("Failed to open log file {log_file:?}"))?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(f)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .context(
                "Failed to start logging. You probably already have a subscriber running.",
            )?;

        let span_guard = tracing::trace_span!("main").entered();

        Ok(LogGuard {
            _span_guard: span_guard,
        })
    }
}
