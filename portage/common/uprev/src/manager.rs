// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::info;
use version::Version;

use crate::{
    chroot::Chroot,
    ebuild::{comparable_content, ebuild_path, is_stable_content, stabilize, EBuildFile},
    error::{Result, UprevError},
    resolver::{best_ebuild, EBuildResolver},
};

/// What a single [`UprevManager::uprev`] call did to a package.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UprevOutcome {
    /// The best stable ebuild already matches the target and the unstable
    /// ebuild.
    NoChange,
    /// The stable ebuild was rewritten with the next revision.
    RevisionBump,
    /// A stable ebuild was written for the target version.
    VersionBump,
}

/// Moves stable ebuilds of packages in an overlay to a target version.
///
/// One manager serves one uprev session. Paths touched by all
/// [`UprevManager::uprev`] calls accumulate in [`UprevManager::modified_paths`]
/// as removed path followed by written path.
pub struct UprevManager<'a> {
    target_version: Version,
    overlay_dir: PathBuf,
    chroot: &'a dyn Chroot,
    boards: Vec<String>,
    resolver: EBuildResolver,
    modified_paths: Vec<PathBuf>,
}

impl<'a> UprevManager<'a> {
    /// Creates a manager for `target_version`. Revisions are picked by the
    /// manager, so any revision on the target is dropped.
    pub fn new(target_version: Version, overlay_dir: impl AsRef<Path>, chroot: &'a dyn Chroot) -> Self {
        Self {
            target_version: target_version.without_revision(),
            overlay_dir: overlay_dir.as_ref().to_owned(),
            chroot,
            boards: Vec::new(),
            resolver: EBuildResolver::new(),
            modified_paths: Vec::new(),
        }
    }

    /// Sets the boards whose binary package caches are cleaned before writes.
    pub fn with_boards(mut self, boards: Vec<String>) -> Self {
        self.boards = boards;
        self
    }

    /// Replaces the resolver, e.g. with one sharing a scan cache.
    pub fn with_resolver(mut self, resolver: EBuildResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn target_version(&self) -> &Version {
        &self.target_version
    }

    pub fn modified_paths(&self) -> &[PathBuf] {
        &self.modified_paths
    }

    pub fn into_modified_paths(self) -> Vec<PathBuf> {
        self.modified_paths
    }

    /// Uprevs `package` (`category/name`) under the overlay directory.
    pub fn uprev(&mut self, package: &str) -> Result<UprevOutcome> {
        let package_dir = self.overlay_dir.join(package);
        let ebuilds = self.resolver.find_ebuilds(&package_dir)?;
        let unstable = ebuilds
            .unstable
            .ok_or_else(|| UprevError::MissingUnstable(package_dir.clone()))?;
        let best_stable = if ebuilds.stables.is_empty() {
            None
        } else {
            Some(best_ebuild(&ebuilds.stables)?.clone())
        };

        match best_stable {
            Some(stable) => {
                let target = self.target_version.inherit_suffixes(stable.version());
                if stable.version().without_revision() == target {
                    self.revision_bump(package, &unstable, &stable)
                } else {
                    self.version_bump(package, &unstable, Some(&stable), &target)
                }
            }
            None => {
                let target = self.target_version.clone();
                self.version_bump(package, &unstable, None, &target)
            }
        }
    }

    fn revision_bump(
        &mut self,
        package: &str,
        unstable: &EBuildFile,
        stable: &EBuildFile,
    ) -> Result<UprevOutcome> {
        let unstable_content = std::fs::read_to_string(unstable.path())?;
        let stable_content = std::fs::read_to_string(stable.path())?;
        if comparable_content(&unstable_content) == comparable_content(&stable_content) {
            info!(
                "Skip: {} is up to date at {}",
                package,
                stable.path().display()
            );
            return Ok(UprevOutcome::NoChange);
        }

        let new_version = stable.version().with_revision(stable.revision() + 1);
        let new_path = stable.sibling_path(&new_version);
        let new_content = stabilize_unstable(unstable, &unstable_content)?;
        info!("Rev: {} {} -> {}", package, stable.version(), new_version);
        self.replace(Some(stable.path()), &new_path, &new_content)?;
        Ok(UprevOutcome::RevisionBump)
    }

    fn version_bump(
        &mut self,
        package: &str,
        unstable: &EBuildFile,
        stable: Option<&EBuildFile>,
        target: &Version,
    ) -> Result<UprevOutcome> {
        let unstable_content = std::fs::read_to_string(unstable.path())?;
        let new_version = target.with_revision(1);
        let dir = unstable.path().parent().unwrap_or_else(|| Path::new(""));
        let new_path = ebuild_path(dir, unstable.package_name(), &new_version);
        let new_content = stabilize_unstable(unstable, &unstable_content)?;
        match stable {
            Some(stable) => info!("Uprev: {} {} -> {}", package, stable.version(), new_version),
            None => info!("Uprev: {} (no stable ebuild) -> {}", package, new_version),
        }
        self.replace(stable.map(EBuildFile::path), &new_path, &new_content)?;
        Ok(UprevOutcome::VersionBump)
    }

    /// Writes `content` to `new_path` and removes `old_path`. Paths are
    /// recorded only once the corresponding step has succeeded.
    fn replace(&mut self, old_path: Option<&Path>, new_path: &Path, content: &str) -> Result<()> {
        self.clean_stale_packages()?;

        write_atomically(new_path, content)?;

        let Some(old_path) = old_path.filter(|old| *old != new_path) else {
            self.modified_paths.push(new_path.to_owned());
            return Ok(());
        };
        if let Err(e) = std::fs::remove_file(old_path) {
            self.modified_paths.push(new_path.to_owned());
            return Err(e.into());
        }
        self.modified_paths.push(old_path.to_owned());
        self.modified_paths.push(new_path.to_owned());
        Ok(())
    }

    fn clean_stale_packages(&self) -> Result<()> {
        if !self.chroot.exists() {
            info!("No chroot found; skipping stale package cleanup");
            return Ok(());
        }
        self.chroot.clean_stale_packages(&self.boards)
    }
}

/// Stabilizes the contents of the 9999 ebuild. The result must read as
/// stable, or the written ebuild would be ignored on the next scan.
fn stabilize_unstable(unstable: &EBuildFile, content: &str) -> Result<String> {
    let stable = stabilize(content);
    if !is_stable_content(&stable) {
        return Err(UprevError::CannotStabilize(unstable.path().to_owned()));
    }
    Ok(stable)
}

/// Replaces `path` with `content` through a temporary file in the same
/// directory, so a failed write never leaves a truncated ebuild behind.
fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
