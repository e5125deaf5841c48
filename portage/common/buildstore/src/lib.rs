// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Build status persistence in front of a relational database ("CIDB") and a
//! build queue service ("Buildbucket").

mod backend;
mod buildbucket;
mod cidb;
mod config;
mod error;
mod failure;
mod record;
mod store;

pub use backend::{BackendFactory, BackendResult, HistoryQuery, QueueBackend, RelationalBackend};
pub use buildbucket::{parse_build_response, with_retries, BuildbucketClient};
pub use cidb::SqliteCidb;
pub use config::{BuildStoreConfig, BuildbucketConfig, CidbConfig, DefaultBackendFactory};
pub use error::{BackendError, Result, StoreError};
pub use failure::{merge_all, BuildFailure, FailureCategory, FailureRecord};
pub use record::{
    BuildId, BuildMetadata, BuildRecord, BuildStatus, NewBuild, StageId, StageRecord,
};
pub use store::{BuildStore, Routing};
