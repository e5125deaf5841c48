// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::Write;

use chrono::Duration;

use crate::{
    stats::{BuildTimingStats, StageStats, Stats},
    timing::{BuildTiming, StageTiming},
};

const LABEL_WIDTH: usize = 10;
const VALUE_WIDTH: usize = 9;

/// Formats a duration as `H:MM:SS`, or `-` when missing.
pub fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return "-".to_owned();
    };
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    format!(
        "{sign}{}:{:02}:{:02}",
        total / 3600,
        total % 3600 / 60,
        total % 60
    )
}

/// Renders `focus` side by side with the aggregate `stats`, with stages
/// ordered by their median start offset.
pub fn render(focus: &BuildTiming, stats: &BuildTimingStats) -> String {
    let mut out = String::new();
    write_report(&mut out, focus, stats).expect("writing to a String never fails");
    out
}

fn write_report(
    out: &mut String,
    focus: &BuildTiming,
    stats: &BuildTimingStats,
) -> std::fmt::Result {
    writeln!(
        out,
        "Build {} ({}): {}, compared with {} builds",
        focus.id, focus.build_config, focus.status, stats.builds
    )?;
    write_header(out)?;
    writeln!(out, "Build")?;
    write_row(out, "duration", focus.duration, stats.duration.as_ref())?;

    for stage in sorted_by_median_start(&stats.stages) {
        let focus_stage = focus.stages.iter().find(|s| s.name == stage.name);
        let value = |f: fn(&StageTiming) -> Option<Duration>| focus_stage.and_then(f);
        writeln!(out, "{}", stage.name)?;
        write_row(out, "start", value(|s| s.start), stage.start.as_ref())?;
        write_row(out, "finish", value(|s| s.finish), stage.finish.as_ref())?;
        write_row(out, "duration", value(|s| s.duration), stage.duration.as_ref())?;
    }
    Ok(())
}

fn sorted_by_median_start(stages: &[StageStats]) -> Vec<&StageStats> {
    let mut sorted: Vec<&StageStats> = stages.iter().collect();
    // Stages that never recorded a start go last, in their original order.
    sorted.sort_by_key(|s| match &s.start {
        Some(start) => (false, start.median),
        None => (true, Duration::zero()),
    });
    sorted
}

fn write_header(out: &mut String) -> std::fmt::Result {
    write!(out, "{:LABEL_WIDTH$}", "")?;
    for title in ["focus", "median", "mean", "min", "max"] {
        write!(out, " {title:>VALUE_WIDTH$}")?;
    }
    writeln!(out)
}

fn write_row(
    out: &mut String,
    label: &str,
    focus: Option<Duration>,
    stats: Option<&Stats>,
) -> std::fmt::Result {
    let values = [
        focus,
        stats.map(|s| s.median),
        stats.map(|s| s.mean),
        stats.map(|s| s.min),
        stats.map(|s| s.max),
    ];
    write!(out, "  {label:w$}", w = LABEL_WIDTH - 2)?;
    for value in values {
        write!(out, " {:>VALUE_WIDTH$}", format_duration(value))?;
    }
    writeln!(out)
}
