// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use buildstore::{BuildId, BuildStore, BuildStoreConfig};
use buildtiming::{
    aggregate_build_timing, fetch_build_timing, fetch_build_timings, render, BuildTiming,
};
use chrono::NaiveDate;
use clap::Parser;
use cliutil::{cli_main, ConfigBuilder};
use std::{path::PathBuf, process::ExitCode};
use tracing::info;

/// Compares the timing of a build and its stages with recent builds of the
/// same config.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about=None)]
struct Cli {
    /// Build store settings in TOML.
    #[arg(long)]
    config: PathBuf,

    /// Build config to collect history for, e.g. eve-release.
    #[arg(long)]
    build_config: String,

    /// Build to compare against the history. Defaults to the newest build.
    #[arg(long)]
    build_id: Option<BuildId>,

    /// Maximum number of builds in the history.
    #[arg(long, default_value_t = 100)]
    limit: usize,

    /// Oldest day of builds in the history (YYYY-MM-DD).
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Newest day of builds in the history (YYYY-MM-DD), inclusive.
    #[arg(long)]
    end_date: Option<NaiveDate>,
}

fn report(store: &mut BuildStore, cli: &Cli) -> Result<String> {
    let history = fetch_build_timings(
        store,
        &cli.build_config,
        Some(cli.limit),
        cli.start_date,
        cli.end_date,
    )
    .with_context(|| format!("Failed to fetch history of {}", cli.build_config))?;

    let focus = match cli.build_id {
        Some(id) => fetch_build_timing(store, id)
            .with_context(|| format!("Failed to fetch build {id}"))?
            .with_context(|| format!("Build {id} not found"))?,
        None => newest(&history)?,
    };
    info!("Comparing build {} with {} builds", focus.id, history.len());

    let stats = aggregate_build_timing(&history);
    Ok(render(&focus, &stats))
}

fn newest(history: &[BuildTiming]) -> Result<BuildTiming> {
    match history.first() {
        Some(build) => Ok(build.clone()),
        None => bail!("No builds found"),
    }
}

fn do_main() -> Result<()> {
    let cli = Cli::try_parse()?;
    let config = BuildStoreConfig::load(&cli.config)?;
    let mut store = BuildStore::from_config(config);
    print!("{}", report(&mut store, &cli)?);
    Ok(())
}

fn main() -> ExitCode {
    cli_main(
        do_main,
        ConfigBuilder::new().build().expect("valid config"),
    )
}
