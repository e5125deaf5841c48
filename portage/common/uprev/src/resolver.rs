// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::HashMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, warn};

use crate::{
    ebuild::{EBuildFile, EBUILD_EXTENSION},
    error::{Result, UprevError},
};

/// The ebuilds of one package directory, split by role.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageEBuilds {
    /// The `9999` ebuild, if the package has one.
    pub unstable: Option<EBuildFile>,
    /// Stable ebuilds, sorted by file name.
    pub stables: Vec<EBuildFile>,
}

/// Remembers directory scans keyed by the absolute directory path and its
/// modification time.
///
/// Adding, removing or renaming an ebuild bumps the directory mtime and
/// invalidates the entry. Editing an ebuild in place does not, so a cache
/// must not outlive a session in which ebuild contents may change.
#[derive(Debug, Default)]
pub struct ScanCache {
    entries: HashMap<PathBuf, (SystemTime, PackageEBuilds)>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, dir: &Path, mtime: SystemTime) -> Option<&PackageEBuilds> {
        match self.entries.get(dir) {
            Some((cached_mtime, ebuilds)) if *cached_mtime == mtime => Some(ebuilds),
            _ => None,
        }
    }

    fn insert(&mut self, dir: PathBuf, mtime: SystemTime, ebuilds: PackageEBuilds) {
        self.entries.insert(dir, (mtime, ebuilds));
    }
}

/// Finds the unstable and stable ebuilds of a package.
#[derive(Debug, Default)]
pub struct EBuildResolver {
    cache: Option<ScanCache>,
}

impl EBuildResolver {
    /// Creates a resolver that rescans directories on every call.
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Creates a resolver that reuses scans through `cache`.
    pub fn with_cache(cache: ScanCache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Returns the cache, if one was injected.
    pub fn into_cache(self) -> Option<ScanCache> {
        self.cache
    }

    /// Scans `dir` for ebuilds.
    ///
    /// Only regular files with the `.ebuild` extension are considered.
    /// Ebuilds that are neither `9999` nor stable are ignored.
    pub fn find_ebuilds(&mut self, dir: &Path) -> Result<PackageEBuilds> {
        let Some(cache) = self.cache.as_mut() else {
            return scan_package_dir(dir);
        };

        let dir = std::path::absolute(dir)?;
        let mtime = std::fs::metadata(&dir)?.modified()?;
        if let Some(ebuilds) = cache.get(&dir, mtime) {
            debug!("Using cached scan of {}", dir.display());
            return Ok(ebuilds.clone());
        }
        let ebuilds = scan_package_dir(&dir)?;
        cache.insert(dir, mtime, ebuilds.clone());
        Ok(ebuilds)
    }
}

fn scan_package_dir(dir: &Path) -> Result<PackageEBuilds> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // Symlinks and directories are not ebuilds of this package.
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension() == Some(OsStr::new(EBUILD_EXTENSION)) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut unstables = Vec::new();
    let mut stables = Vec::new();
    for path in paths {
        let ebuild = EBuildFile::load(&path)?;
        if ebuild.is_unstable_head() {
            if ebuild.is_stable() {
                return Err(UprevError::StableUnstableHead(path));
            }
            unstables.push(ebuild);
        } else if ebuild.is_stable() {
            stables.push(ebuild);
        } else {
            warn!("Ignoring unstable non-9999 ebuild {}", path.display());
        }
    }

    if unstables.len() > 1 {
        return Err(UprevError::MultipleUnstable {
            dir: dir.to_owned(),
            paths: unstables.into_iter().map(|e| e.path().to_owned()).collect(),
        });
    }

    Ok(PackageEBuilds {
        unstable: unstables.pop(),
        stables,
    })
}

/// Returns the newest ebuild: the highest version, then the highest
/// revision. Among exact ties the earliest in `ebuilds` wins.
pub fn best_ebuild(ebuilds: &[EBuildFile]) -> Result<&EBuildFile> {
    let (first, rest) = ebuilds
        .split_first()
        .ok_or(UprevError::EmptyInput("best_ebuild"))?;
    Ok(rest.iter().fold(first, |best, candidate| {
        if candidate.cmp_version(best).is_gt() {
            candidate
        } else {
            best
        }
    }))
}
