// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use buildstore::{BuildId, BuildRecord, BuildStatus};
use chrono::{DateTime, Duration, Utc};

/// Timing of one stage, relative to the start of its build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageTiming {
    pub name: String,
    /// Offset of the stage start from the build start.
    pub start: Option<Duration>,
    /// Offset of the stage finish from the build start.
    pub finish: Option<Duration>,
    pub duration: Option<Duration>,
}

/// Timing of a build and its stages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildTiming {
    pub id: BuildId,
    pub build_config: String,
    pub status: BuildStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub stages: Vec<StageTiming>,
}

/// Converts the absolute timestamps of `build` into offsets from its start.
///
/// Any value depending on a missing timestamp is `None`.
pub fn to_timing(build: &BuildRecord) -> BuildTiming {
    let build_start = build.start_time;
    let offset = |time: Option<DateTime<Utc>>| Some(time? - build_start?);
    BuildTiming {
        id: build.id,
        build_config: build.build_config.clone(),
        status: build.status,
        start_time: build_start,
        duration: between(build.start_time, build.finish_time),
        stages: build
            .stages
            .iter()
            .map(|stage| StageTiming {
                name: stage.name.clone(),
                start: offset(stage.start_time),
                finish: offset(stage.finish_time),
                duration: between(stage.start_time, stage.finish_time),
            })
            .collect(),
    }
}

fn between(start: Option<DateTime<Utc>>, finish: Option<DateTime<Utc>>) -> Option<Duration> {
    Some(finish? - start?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildstore::StageRecord;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(seconds: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap())
    }

    fn stage(name: &str, start: Option<DateTime<Utc>>, finish: Option<DateTime<Utc>>) -> StageRecord {
        StageRecord {
            id: 0,
            build_id: 1,
            name: name.to_owned(),
            board: None,
            status: BuildStatus::Passed,
            start_time: start,
            finish_time: finish,
        }
    }

    fn build(start: Option<DateTime<Utc>>, finish: Option<DateTime<Utc>>, stages: Vec<StageRecord>) -> BuildRecord {
        BuildRecord {
            id: 1,
            build_config: "eve-release".to_owned(),
            builder_name: "eve-release".to_owned(),
            build_number: Some(1),
            start_time: start,
            finish_time: finish,
            status: BuildStatus::Passed,
            waterfall: String::new(),
            master_build_id: None,
            buildbucket_id: None,
            platform_version: None,
            full_version: None,
            summary: None,
            stages,
        }
    }

    #[test]
    fn test_to_timing() {
        let timing = to_timing(&build(
            at(0),
            at(3600),
            vec![
                stage("SyncStage", at(10), at(70)),
                stage("BuildPackages", at(70), None),
                stage("Archive", None, at(3000)),
            ],
        ));

        assert_eq!(Some(Duration::seconds(3600)), timing.duration);
        assert_eq!(
            vec![
                StageTiming {
                    name: "SyncStage".to_owned(),
                    start: Some(Duration::seconds(10)),
                    finish: Some(Duration::seconds(70)),
                    duration: Some(Duration::seconds(60)),
                },
                StageTiming {
                    name: "BuildPackages".to_owned(),
                    start: Some(Duration::seconds(70)),
                    finish: None,
                    duration: None,
                },
                StageTiming {
                    name: "Archive".to_owned(),
                    start: None,
                    finish: Some(Duration::seconds(3000)),
                    duration: None,
                },
            ],
            timing.stages
        );
    }

    #[test]
    fn test_to_timing_without_build_start() {
        let timing = to_timing(&build(None, at(100), vec![stage("SyncStage", at(10), at(70))]));
        assert_eq!(None, timing.duration);
        assert_eq!(None, timing.stages[0].start);
        assert_eq!(None, timing.stages[0].finish);
        // The stage duration does not depend on the build start.
        assert_eq!(Some(Duration::seconds(60)), timing.stages[0].duration);
    }

    #[test]
    fn test_zero_length_is_not_missing() {
        let timing = to_timing(&build(at(0), at(0), vec![stage("Noop", at(0), at(0))]));
        assert_eq!(Some(Duration::zero()), timing.duration);
        assert_eq!(Some(Duration::zero()), timing.stages[0].duration);
    }
}
