// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use chrono::NaiveDate;

use crate::{
    error::BackendError,
    record::{BuildId, BuildMetadata, BuildRecord, BuildStatus, NewBuild, StageId, StageRecord},
};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Filters for [`RelationalBackend::get_build_history`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HistoryQuery {
    /// Maximum number of builds to return. `None` means no limit.
    pub limit: Option<usize>,
    /// Only builds started on or after this date.
    pub start_date: Option<NaiveDate>,
    /// Only builds started on or before this date.
    pub end_date: Option<NaiveDate>,
}

/// A relational build status database ("CIDB").
///
/// Records returned from reads have an empty `stages` list; stages are
/// fetched separately with [`RelationalBackend::get_builds_stages`].
pub trait RelationalBackend {
    fn insert_build(&self, build: &NewBuild) -> BackendResult<BuildId>;

    fn insert_build_stage(
        &self,
        build_id: BuildId,
        name: &str,
        board: Option<&str>,
        status: BuildStatus,
    ) -> BackendResult<StageId>;

    fn start_build_stage(&self, stage_id: StageId) -> BackendResult<()>;

    fn finish_build_stage(&self, stage_id: StageId, status: BuildStatus) -> BackendResult<()>;

    fn finish_build(
        &self,
        build_id: BuildId,
        status: BuildStatus,
        summary: Option<&str>,
    ) -> BackendResult<()>;

    fn update_metadata(&self, build_id: BuildId, metadata: &BuildMetadata) -> BackendResult<()>;

    fn get_build_statuses(&self, build_ids: &[BuildId]) -> BackendResult<Vec<BuildRecord>>;

    fn get_build_statuses_with_queue_ids(
        &self,
        queue_ids: &[String],
    ) -> BackendResult<Vec<BuildRecord>>;

    fn get_builds_stages(&self, build_ids: &[BuildId]) -> BackendResult<Vec<StageRecord>>;

    /// Returns builds of `build_config`, newest first.
    fn get_build_history(
        &self,
        build_config: &str,
        query: &HistoryQuery,
    ) -> BackendResult<Vec<BuildRecord>>;

    fn get_slave_statuses(&self, master_build_id: BuildId) -> BackendResult<Vec<BuildRecord>>;
}

/// A build queue service ("Buildbucket").
pub trait QueueBackend {
    fn get_build_statuses_with_queue_ids(
        &self,
        queue_ids: &[String],
    ) -> BackendResult<Vec<BuildRecord>>;
}

/// Constructs backend clients. Called again whenever the owning process
/// changes, so every call must return a fresh client.
pub trait BackendFactory {
    fn relational(&self) -> BackendResult<Box<dyn RelationalBackend>>;

    fn queue(&self) -> BackendResult<Box<dyn QueueBackend>>;
}
