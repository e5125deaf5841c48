// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::BackendError;

/// Primary key of a build in the relational store.
pub type BuildId = i64;

/// Primary key of a stage in the relational store.
pub type StageId = i64;

/// Status of a build or a stage, as stored in the `status` columns.
#[derive(
    AsRefStr, Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildStatus {
    Planned,
    #[strum(serialize = "inflight")]
    #[serde(rename = "inflight")]
    Started,
    Waiting,
    #[strum(serialize = "pass")]
    #[serde(rename = "pass")]
    Passed,
    #[strum(serialize = "fail")]
    #[serde(rename = "fail")]
    Failed,
    Aborted,
    Skipped,
    Forgiven,
    Missing,
}

impl BuildStatus {
    /// Whether the status will not change anymore.
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            BuildStatus::Passed
                | BuildStatus::Failed
                | BuildStatus::Aborted
                | BuildStatus::Skipped
                | BuildStatus::Forgiven
        )
    }
}

/// Values recorded when a build starts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NewBuild {
    pub builder_name: String,
    pub build_number: i64,
    pub build_config: String,
    pub bot_hostname: String,
    pub master_build_id: Option<BuildId>,
    pub buildbucket_id: Option<String>,
    pub waterfall: String,
    pub branch: Option<String>,
}

/// Build metadata reported once the versions of a build are known.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A build as read back from a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildRecord {
    pub id: BuildId,
    pub build_config: String,
    pub builder_name: String,
    pub build_number: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub status: BuildStatus,
    pub waterfall: String,
    pub master_build_id: Option<BuildId>,
    pub buildbucket_id: Option<String>,
    pub platform_version: Option<String>,
    pub full_version: Option<String>,
    pub summary: Option<String>,
    pub stages: Vec<StageRecord>,
}

impl BuildRecord {
    /// Checks the timestamps of the build and all of its stages.
    pub fn validate(&self) -> Result<(), BackendError> {
        check_time_order(
            &format!("build {}", self.id),
            self.start_time,
            self.finish_time,
        )?;
        self.stages.iter().try_for_each(StageRecord::validate)
    }
}

/// A stage of a build. Either timestamp may be missing, e.g. for a stage
/// that started but never finished.
#[derive(Clone, Debug, PartialEq)]
pub struct StageRecord {
    pub id: StageId,
    pub build_id: BuildId,
    pub name: String,
    pub board: Option<String>,
    pub status: BuildStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn validate(&self) -> Result<(), BackendError> {
        check_time_order(
            &format!("stage {} ({})", self.id, self.name),
            self.start_time,
            self.finish_time,
        )
    }
}

fn check_time_order(
    what: &str,
    start: Option<DateTime<Utc>>,
    finish: Option<DateTime<Utc>>,
) -> Result<(), BackendError> {
    match (start, finish) {
        (Some(start), Some(finish)) if start > finish => Err(BackendError::CorruptRecord(format!(
            "{what} finished at {finish} before it started at {start}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn stage(start: Option<i64>, finish: Option<i64>) -> StageRecord {
        StageRecord {
            id: 1,
            build_id: 1,
            name: "BuildPackages".to_owned(),
            board: None,
            status: BuildStatus::Passed,
            start_time: start.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            finish_time: finish.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!("inflight", BuildStatus::Started.as_ref());
        assert_eq!("pass", BuildStatus::Passed.to_string());
        assert_eq!(BuildStatus::Failed, BuildStatus::from_str("fail").unwrap());
        assert_eq!(BuildStatus::Planned, BuildStatus::from_str("planned").unwrap());
        assert!(BuildStatus::from_str("passed").is_err());
    }

    #[test]
    fn test_is_completed() {
        assert!(BuildStatus::Passed.is_completed());
        assert!(BuildStatus::Aborted.is_completed());
        assert!(!BuildStatus::Started.is_completed());
        assert!(!BuildStatus::Planned.is_completed());
    }

    #[test]
    fn test_stage_validate() {
        assert!(stage(Some(1), Some(2)).validate().is_ok());
        assert!(stage(Some(2), Some(2)).validate().is_ok());
        assert!(stage(Some(1), None).validate().is_ok());
        assert!(stage(None, None).validate().is_ok());
        assert!(matches!(
            stage(Some(3), Some(2)).validate(),
            Err(BackendError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_metadata_json() {
        let metadata = BuildMetadata {
            platform_version: Some("15000.0.0".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            r#"{"platform-version":"15000.0.0"}"#,
            serde_json::to_string(&metadata).unwrap()
        );
    }
}
