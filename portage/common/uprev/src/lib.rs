// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Moves stable ChromiumOS ebuilds to new versions.
//!
//! A package directory holds one unstable `9999` ebuild tracking the tip of
//! its sources and a number of stable ebuilds. [`UprevManager`] writes the
//! unstable contents, marked stable, under the target version and removes
//! the ebuild it replaces.

mod chrome;
mod chroot;
mod ebuild;
mod error;
mod manager;
mod resolver;

pub use chrome::{best_chrome_version, best_from_refs, GitRef};
pub use chroot::{Chroot, NoChroot, SdkChroot};
pub use ebuild::{
    comparable_content, ebuild_path, ebuild_to_cp, is_stable_content, parse_file_name,
    read_stability, split_ebuild_path, stabilize, EBuildFile, EBUILD_EXTENSION,
};
pub use error::{Result, UprevError};
pub use manager::{UprevManager, UprevOutcome};
pub use resolver::{best_ebuild, EBuildResolver, PackageEBuilds, ScanCache};
