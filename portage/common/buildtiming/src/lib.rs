// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Build and stage timing statistics over build history.

mod fetch;
mod report;
mod stats;
mod timing;

pub use fetch::{fetch_build_timing, fetch_build_timings};
pub use report::{format_duration, render};
pub use stats::{
    aggregate_build_timing, aggregate_durations, aggregate_stage_durations, BuildTimingStats,
    StageStats, Stats,
};
pub use timing::{to_timing, BuildTiming, StageTiming};
