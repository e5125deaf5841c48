// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cliutil::{cli_main, ConfigBuilder};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::info;
use uprev::{best_chrome_version, Chroot, NoChroot, SdkChroot, UprevManager};
use version::Version;

#[derive(Parser, Debug)]
#[command()]
struct Cli {
    #[clap(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Uprev(UprevArgs),
    BestChromeVersion(BestChromeVersionArgs),
}

/// Moves the stable ebuilds of packages in an overlay to a target version.
#[derive(Parser, Debug)]
struct UprevArgs {
    /// Overlay directory containing the packages.
    #[arg(long)]
    overlay: PathBuf,

    /// Version to uprev to, e.g. 4.3.2.2 or 120.0.6099.5_rc. A revision
    /// given here is ignored.
    #[arg(long)]
    version: Version,

    /// SDK chroot whose stale binary packages are cleaned before writing.
    /// Cleaning is skipped when omitted.
    #[arg(long)]
    chroot: Option<PathBuf>,

    /// Board whose binary packages are cleaned. May be repeated.
    #[arg(long)]
    board: Vec<String>,

    /// Packages to uprev, as category/package.
    #[arg(required = true)]
    packages: Vec<String>,
}

/// Prints the newest of the given Chrome versions.
#[derive(Parser, Debug)]
struct BestChromeVersionArgs {
    #[arg(required = true)]
    versions: Vec<String>,
}

fn do_uprev(args: UprevArgs) -> Result<Vec<PathBuf>> {
    let chroot: Box<dyn Chroot> = match &args.chroot {
        Some(path) => Box::new(SdkChroot::new(path)),
        None => Box::new(NoChroot),
    };
    uprev_packages(
        args.version,
        &args.overlay,
        chroot.as_ref(),
        args.board,
        &args.packages,
    )
}

fn uprev_packages(
    target: Version,
    overlay: &Path,
    chroot: &dyn Chroot,
    boards: Vec<String>,
    packages: &[String],
) -> Result<Vec<PathBuf>> {
    let mut manager = UprevManager::new(target, overlay, chroot).with_boards(boards);
    for package in packages {
        let outcome = manager
            .uprev(package)
            .with_context(|| format!("Failed to uprev {package}"))?;
        info!("{package}: {outcome:?}");
    }
    Ok(manager.into_modified_paths())
}

fn do_main() -> Result<()> {
    let cli = Cli::try_parse()?;
    match cli.commands {
        Commands::Uprev(args) => {
            for path in do_uprev(args)? {
                println!("{}", path.display());
            }
        }
        Commands::BestChromeVersion(args) => {
            println!("{}", best_chrome_version(&args.versions)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    cli_main(
        do_main,
        ConfigBuilder::new()
            .log_command_line(false)
            .build()
            .expect("valid config"),
    )
}
