// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use buildstore::{BuildId, BuildRecord, BuildStore, Result};
use chrono::NaiveDate;
use itertools::Itertools;
use tracing::info;

use crate::timing::{to_timing, BuildTiming};

/// Fetches the timing of recent builds of `build_config`, newest first.
pub fn fetch_build_timings(
    store: &mut BuildStore,
    build_config: &str,
    limit: Option<usize>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<Vec<BuildTiming>> {
    let builds = store.get_build_history(build_config, limit, start_date, end_date)?;
    info!("Found {} builds of {}", builds.len(), build_config);
    let builds = attach_stages(store, builds)?;
    Ok(builds.iter().map(to_timing).collect())
}

/// Fetches the timing of a single build, or `None` if it does not exist.
pub fn fetch_build_timing(store: &mut BuildStore, build_id: BuildId) -> Result<Option<BuildTiming>> {
    let builds = store.get_build_statuses(&[build_id], &[])?;
    let builds = attach_stages(store, builds)?;
    Ok(builds.first().map(to_timing))
}

fn attach_stages(store: &mut BuildStore, mut builds: Vec<BuildRecord>) -> Result<Vec<BuildRecord>> {
    if builds.is_empty() {
        return Ok(builds);
    }
    let ids: Vec<BuildId> = builds.iter().map(|b| b.id).collect();
    let mut stages = store
        .get_builds_stages(&ids)?
        .into_iter()
        .into_group_map_by(|stage| stage.build_id);
    for build in &mut builds {
        build.stages = stages.remove(&build.id).unwrap_or_default();
    }
    Ok(builds)
}
