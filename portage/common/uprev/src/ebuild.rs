// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    cmp::Ordering,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use version::Version;

use crate::error::{Result, UprevError};

pub const EBUILD_EXTENSION: &str = "ebuild";

const KEYWORDS_PREFIX: &str = "KEYWORDS=";

/// An ebuild file on disk, identified by the package name and version
/// encoded in its file name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EBuildFile {
    path: PathBuf,
    package_name: String,
    version: Version,
    is_stable: bool,
}

impl EBuildFile {
    /// Parses the file name of `path` and reads its stability from the
    /// file contents.
    pub fn load(path: &Path) -> Result<Self> {
        let (package_name, version) = parse_file_name(path)?;
        let is_stable = read_stability(path)?;
        Ok(Self {
            path: path.to_owned(),
            package_name,
            version,
            is_stable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The package name, `$PN` in ebuild terms.
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// The full version including the revision, `$PVR` in ebuild terms.
    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn revision(&self) -> u64 {
        self.version.revision()
    }

    pub fn is_stable(&self) -> bool {
        self.is_stable
    }

    pub fn is_unstable_head(&self) -> bool {
        self.version.is_unstable_head()
    }

    /// Orders ebuilds by version, then by revision.
    pub fn cmp_version(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }

    /// Returns the path of a sibling ebuild of the same package at `version`.
    pub fn sibling_path(&self, version: &Version) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        ebuild_path(dir, &self.package_name, version)
    }
}

/// Returns `<dir>/<package_name>-<version>.ebuild`.
pub fn ebuild_path(dir: &Path, package_name: &str, version: &Version) -> PathBuf {
    dir.join(format!("{package_name}-{version}.{EBUILD_EXTENSION}"))
}

/// Extracts the package name and version from an ebuild file name.
///
/// The name must be `<package>-<version>.ebuild`, and when `path` has a
/// parent directory, `<package>` must equal its name.
pub fn parse_file_name(path: &Path) -> Result<(String, Version)> {
    let parse_error = |reason: String| UprevError::Parse {
        path: path.to_owned(),
        reason,
    };

    if path.extension() != Some(OsStr::new(EBUILD_EXTENSION)) {
        return Err(parse_error(format!("missing .{EBUILD_EXTENSION} extension")));
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| parse_error("file name is not valid UTF-8".into()))?;
    let (package_name, version) =
        Version::from_str_suffix(stem).map_err(|e| parse_error(e.to_string()))?;
    if package_name.is_empty() {
        return Err(parse_error("empty package name".into()));
    }

    let dir_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|name| name.to_str());
    if let Some(dir_name) = dir_name {
        if dir_name != package_name {
            return Err(parse_error(format!(
                "package name {package_name:?} does not match directory {dir_name:?}"
            )));
        }
    }

    Ok((package_name.to_owned(), version))
}

/// Reads the `KEYWORDS` of an ebuild and reports whether it is marked
/// stable. A file without `KEYWORDS` is treated as not stable.
pub fn read_stability(path: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(path)?;
    Ok(is_stable_content(&content))
}

/// Whether any `KEYWORDS=` line carries a keyword that is neither `~`-prefixed
/// nor `-*`.
pub fn is_stable_content(content: &str) -> bool {
    content
        .lines()
        .filter_map(|line| line.strip_prefix(KEYWORDS_PREFIX))
        .flat_map(|value| value.trim().trim_matches(|c| c == '"' || c == '\'').split_whitespace())
        .any(|keyword| !keyword.starts_with('~') && keyword != "-*")
}

/// Marks ebuild contents stable by dropping every `~` from `KEYWORDS=` lines.
pub fn stabilize(content: &str) -> String {
    map_lines(content, |line| {
        if line.starts_with(KEYWORDS_PREFIX) {
            Some(line.replace('~', ""))
        } else {
            Some(line.to_owned())
        }
    })
}

/// Normalizes ebuild contents for the "did anything change" check.
///
/// Only `KEYWORDS=` lines are stabilized; every other line, including
/// `CROS_WORKON_COMMIT=`, takes part in the comparison. Versions and
/// revisions live only in file names and never take part.
pub fn comparable_content(content: &str) -> String {
    stabilize(content)
}

fn map_lines<F>(content: &str, f: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        if let Some(mapped) = f(body) {
            out.push_str(&mapped);
            out.push_str(newline);
        }
    }
    out
}

/// Splits an ebuild path into `$CATEGORY`, `$PN` and `$P`.
///
/// Only the last three path components are looked at; nothing is validated.
///
/// ```
/// # use std::path::Path;
/// # use uprev::split_ebuild_path;
/// assert_eq!(
///     Some(("chromeos-base", "power_manager", "power_manager-9999")),
///     split_ebuild_path(Path::new("/o/chromeos-base/power_manager/power_manager-9999.ebuild"))
/// );
/// ```
pub fn split_ebuild_path(path: &Path) -> Option<(&str, &str, &str)> {
    let p = path.file_stem()?.to_str()?;
    let package_dir = path.parent()?;
    let pn = package_dir.file_name()?.to_str()?;
    let category = package_dir.parent()?.file_name()?.to_str()?;
    Some((category, pn, p))
}

/// Returns `$CATEGORY/$PN` for an ebuild path.
pub fn ebuild_to_cp(path: &Path) -> Option<String> {
    split_ebuild_path(path).map(|(category, pn, _)| format!("{category}/{pn}"))
}
