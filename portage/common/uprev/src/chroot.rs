// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use tracing::{info, instrument};

use crate::error::{Result, UprevError};

/// The build environment whose binary package cache goes stale when ebuilds
/// are uprevved.
pub trait Chroot {
    /// Whether the build environment exists at all.
    fn exists(&self) -> bool;

    /// Removes binary packages that no longer match any ebuild, for each of
    /// `boards`, or for the host when `boards` is empty.
    fn clean_stale_packages(&self, boards: &[String]) -> Result<()>;
}

/// A ChromiumOS SDK chroot entered through `cros_sdk`.
#[derive(Clone, Debug)]
pub struct SdkChroot {
    path: PathBuf,
}

impl SdkChroot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builds the `eclean` invocation for `board`, run inside the chroot.
    pub fn clean_command(&self, board: Option<&str>) -> Command {
        let eclean = match board {
            Some(board) => format!("eclean-{board}"),
            None => "eclean".to_owned(),
        };
        let mut command = Command::new("cros_sdk");
        command
            .arg("--chroot")
            .arg(&self.path)
            .arg("--")
            .arg(eclean)
            .args(["-d", "packages"]);
        command
    }
}

impl Chroot for SdkChroot {
    fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn clean_stale_packages(&self, boards: &[String]) -> Result<()> {
        if boards.is_empty() {
            return run_and_check(&mut self.clean_command(None));
        }
        for board in boards {
            run_and_check(&mut self.clean_command(Some(board)))?;
        }
        Ok(())
    }
}

/// Stands in for a machine without a chroot; cleaning is always skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoChroot;

impl Chroot for NoChroot {
    fn exists(&self) -> bool {
        false
    }

    fn clean_stale_packages(&self, _boards: &[String]) -> Result<()> {
        Ok(())
    }
}

#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
fn run_and_check(cmd: &mut Command) -> Result<()> {
    info!("Running {cmd:?}");
    let status = cmd.status()?;
    if !status.success() {
        return Err(UprevError::CommandFailed {
            command: format!("{cmd:?}"),
            status,
        });
    }
    Ok(())
}
