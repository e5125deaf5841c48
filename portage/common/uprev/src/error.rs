// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{path::PathBuf, process::ExitStatus};

/// Errors raised while resolving or rewriting ebuilds.
///
/// Variants fall into three groups: malformed input ([`UprevError::Parse`],
/// [`UprevError::InvalidChromeVersion`]), a corrupted repository state or a
/// broken caller contract ([`UprevError::is_invariant_violation`]), and
/// failures of the environment (I/O, the package cleaner).
#[derive(Debug, thiserror::Error)]
pub enum UprevError {
    #[error("ebuild file name {path:?} does not match expected format: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid Chrome version {0:?}")]
    InvalidChromeVersion(String),

    #[error("found multiple unstable ebuilds in {dir:?}: {paths:?}")]
    MultipleUnstable { dir: PathBuf, paths: Vec<PathBuf> },

    #[error("KEYWORDS in 9999 ebuild {0:?} should not be stable")]
    StableUnstableHead(PathBuf),

    #[error("missing 9999 ebuild in {0:?}")]
    MissingUnstable(PathBuf),

    #[error("9999 ebuild {0:?} has no KEYWORDS that can be marked stable")]
    CannotStabilize(PathBuf),

    #[error("{0} called with an empty input")]
    EmptyInput(&'static str),

    #[error("command {command} failed with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UprevError {
    /// Whether the error means the repository is in a state that must not be
    /// silently worked around.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            UprevError::MultipleUnstable { .. }
                | UprevError::StableUnstableHead(_)
                | UprevError::MissingUnstable(_)
                | UprevError::CannotStabilize(_)
                | UprevError::EmptyInput(_)
        )
    }
}

pub type Result<T, E = UprevError> = std::result::Result<T, E>;
