// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashMap;

use chrono::Duration;
use itertools::Itertools;

use crate::timing::{BuildTiming, StageTiming};

/// Summary statistics of a set of durations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stats {
    /// The lower-middle element of the sorted samples.
    pub median: Duration,
    /// The mean, rounded to whole seconds.
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Number of samples that went into the statistics.
    pub count: usize,
}

/// Statistics of one stage across builds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageStats {
    pub name: String,
    pub start: Option<Stats>,
    pub finish: Option<Stats>,
    pub duration: Option<Stats>,
}

/// Statistics of whole builds and of their stages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildTimingStats {
    /// Number of builds aggregated.
    pub builds: usize,
    pub duration: Option<Stats>,
    pub stages: Vec<StageStats>,
}

/// Computes statistics over the present durations. Returns `None` if there
/// are none, so "no data" is never confused with a zero duration.
pub fn aggregate_durations(durations: &[Option<Duration>]) -> Option<Stats> {
    let sorted: Vec<Duration> = durations.iter().flatten().copied().sorted().collect();
    let (&min, &max) = (sorted.first()?, sorted.last()?);
    let count = sorted.len();

    let total_ms: i64 = sorted.iter().map(Duration::num_milliseconds).sum();
    let mean_secs = (total_ms as f64 / count as f64 / 1000.0).round() as i64;

    Some(Stats {
        median: sorted[(count - 1) / 2],
        mean: Duration::seconds(mean_secs),
        min,
        max,
        count,
    })
}

/// Groups the stages of `builds` by name and aggregates each group.
///
/// A stage missing from a build contributes nothing to its statistics.
/// Stages are returned in order of first appearance.
pub fn aggregate_stage_durations(builds: &[BuildTiming]) -> Vec<StageStats> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&StageTiming>> = HashMap::new();
    for stage in builds.iter().flat_map(|build| &build.stages) {
        groups
            .entry(stage.name.as_str())
            .or_insert_with(|| {
                order.push(stage.name.as_str());
                Vec::new()
            })
            .push(stage);
    }

    order
        .into_iter()
        .map(|name| {
            let stages = &groups[name];
            let field = |f: fn(&StageTiming) -> Option<Duration>| {
                aggregate_durations(&stages.iter().map(|s| f(s)).collect::<Vec<_>>())
            };
            StageStats {
                name: name.to_owned(),
                start: field(|s| s.start),
                finish: field(|s| s.finish),
                duration: field(|s| s.duration),
            }
        })
        .collect()
}

/// Aggregates whole-build durations along with per-stage statistics.
pub fn aggregate_build_timing(builds: &[BuildTiming]) -> BuildTimingStats {
    let durations: Vec<Option<Duration>> = builds.iter().map(|b| b.duration).collect();
    BuildTimingStats {
        builds: builds.len(),
        duration: aggregate_durations(&durations),
        stages: aggregate_stage_durations(builds),
    }
}
