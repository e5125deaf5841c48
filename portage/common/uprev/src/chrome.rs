// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{path::PathBuf, str::FromStr};

use version::UNSTABLE_HEAD_VERSION;

use crate::error::{Result, UprevError};

/// A git ref pointing at a Chrome release, e.g. `refs/tags/78.0.3876.0`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GitRef {
    pub repository_path: PathBuf,
    pub ref_name: String,
    pub revision_hash: String,
}

impl GitRef {
    /// The version label of the ref: the last component of its name.
    pub fn version(&self) -> &str {
        self.ref_name.rsplit('/').next().unwrap_or(&self.ref_name)
    }
}

/// A four-component Chrome version (MAJOR.MINOR.BUILD.PATCH).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct ChromeVersion([u32; 4]);

impl FromStr for ChromeVersion {
    type Err = UprevError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || UprevError::InvalidChromeVersion(s.to_owned());
        let mut parts = [0u32; 4];
        let mut components = s.split('.');
        for part in parts.iter_mut() {
            let component = components.next().ok_or_else(invalid)?;
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *part = component.parse().map_err(|_| invalid())?;
        }
        if components.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(parts))
    }
}

/// Returns the newest Chrome version in `versions`.
///
/// `9999` always wins when present; other entries must be four-component
/// dotted versions.
pub fn best_chrome_version<S: AsRef<str>>(versions: &[S]) -> Result<String> {
    let (first, rest) = versions
        .split_first()
        .ok_or(UprevError::EmptyInput("best_chrome_version"))?;
    if versions.iter().any(|v| v.as_ref() == UNSTABLE_HEAD_VERSION) {
        return Ok(UNSTABLE_HEAD_VERSION.to_owned());
    }

    let mut best = (first.as_ref().parse::<ChromeVersion>()?, first.as_ref());
    for version in rest {
        let version = version.as_ref();
        let parsed: ChromeVersion = version.parse()?;
        if parsed > best.0 {
            best = (parsed, version);
        }
    }
    Ok(best.1.to_owned())
}

/// Returns the newest Chrome version labeled by `refs`.
pub fn best_from_refs(refs: &[GitRef]) -> Result<String> {
    let versions: Vec<&str> = refs.iter().map(GitRef::version).collect();
    best_chrome_version(&versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_ref(name: &str) -> GitRef {
        GitRef {
            repository_path: PathBuf::from("/src/chromium"),
            ref_name: name.to_owned(),
            revision_hash: "deadbeef".to_owned(),
        }
    }

    #[test]
    fn test_best_chrome_version() -> Result<()> {
        assert_eq!(
            "4.3.2.1",
            best_chrome_version(&["1.2.3.4", "4.3.2.1", "4.3.2.0"])?
        );
        assert_eq!("10.0.0.0", best_chrome_version(&["9.9.9.9", "10.0.0.0"])?);
        assert_eq!("1.2.3.10", best_chrome_version(&["1.2.3.9", "1.2.3.10"])?);
        Ok(())
    }

    #[test]
    fn test_9999_always_wins() -> Result<()> {
        let orders = [
            ["1.2.3.4", "9999", "4.3.2.1"],
            ["9999", "1.2.3.4", "4.3.2.1"],
            ["1.2.3.4", "4.3.2.1", "9999"],
        ];
        for versions in orders {
            assert_eq!("9999", best_chrome_version(&versions)?);
        }
        Ok(())
    }

    #[test]
    fn test_empty_input() {
        let err = best_chrome_version::<&str>(&[]).unwrap_err();
        assert!(matches!(err, UprevError::EmptyInput(_)));
    }

    #[test]
    fn test_rejects_malformed_versions() {
        for bad in ["1.2.3", "1.2.3.4.5", "1.2.3.x", "1.2.3.4_rc", "", "1..2.3"] {
            let err = best_chrome_version(&[bad]).unwrap_err();
            assert!(
                matches!(err, UprevError::InvalidChromeVersion(_)),
                "{bad:?}: {err:?}"
            );
        }
    }

    #[test]
    fn test_best_from_refs() -> Result<()> {
        let refs = [
            git_ref("refs/tags/78.0.3876.0"),
            git_ref("refs/tags/79.0.3900.1"),
            git_ref("refs/tags/78.0.3999.9"),
        ];
        assert_eq!("79.0.3900.1", best_from_refs(&refs)?);
        assert_eq!("79.0.3900.1", refs[1].version());
        Ok(())
    }

    #[test]
    fn test_best_from_refs_with_unstable() -> Result<()> {
        let refs = [git_ref("refs/tags/78.0.3876.0"), git_ref("9999")];
        assert_eq!("9999", best_from_refs(&refs)?);
        Ok(())
    }
}
