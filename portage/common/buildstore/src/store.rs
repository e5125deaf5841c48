// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use chrono::NaiveDate;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::{
    backend::{BackendFactory, HistoryQuery, QueueBackend, RelationalBackend},
    config::{BuildStoreConfig, DefaultBackendFactory},
    error::{Result, StoreError},
    record::{BuildId, BuildMetadata, BuildRecord, BuildStatus, NewBuild, StageId, StageRecord},
};

/// Which backend serves which kind of request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Routing {
    /// Serve build status reads from the queue backend.
    pub read_from_queue: bool,
    /// Keep the queue backend available for writers that report to it.
    pub write_to_queue: bool,
    /// Record builds and stages in the relational backend.
    pub write_to_relational: bool,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            read_from_queue: false,
            write_to_queue: false,
            write_to_relational: true,
        }
    }
}

impl Routing {
    fn needs_relational(&self) -> bool {
        self.write_to_relational || !self.read_from_queue
    }

    fn needs_queue(&self) -> bool {
        self.read_from_queue || self.write_to_queue
    }
}

enum BackendState {
    Uninitialized,
    Ready {
        pid: Pid,
        relational: Option<Box<dyn RelationalBackend>>,
        queue: Option<Box<dyn QueueBackend>>,
    },
}

/// Routes build status reads and writes to a relational backend and a build
/// queue backend.
///
/// Backends are created on first use and recreated when the calling process
/// is not the one that created them, so a forked child never talks through
/// its parent's connections. A `BuildStore` is not synchronized; share it
/// across threads only behind a lock.
pub struct BuildStore {
    routing: Routing,
    factory: Box<dyn BackendFactory>,
    state: BackendState,
    pid_source: Box<dyn Fn() -> Pid>,
}

impl BuildStore {
    pub fn new(routing: Routing, factory: Box<dyn BackendFactory>) -> Self {
        Self {
            routing,
            factory,
            state: BackendState::Uninitialized,
            pid_source: Box::new(nix::unistd::getpid),
        }
    }

    pub fn from_config(config: BuildStoreConfig) -> Self {
        let routing = Routing {
            read_from_queue: config.read_from_queue,
            write_to_queue: config.write_to_queue,
            write_to_relational: config.write_to_relational,
        };
        Self::new(routing, Box::new(DefaultBackendFactory::new(config)))
    }

    /// Replaces the source of the current process id.
    pub fn with_pid_source(mut self, pid_source: impl Fn() -> Pid + 'static) -> Self {
        self.pid_source = Box::new(pid_source);
        self
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// The process that created the current backends, if any.
    pub fn owning_process_id(&self) -> Option<Pid> {
        match &self.state {
            BackendState::Uninitialized => None,
            BackendState::Ready { pid, .. } => Some(*pid),
        }
    }

    /// Makes sure every backend required by the routing is constructed and
    /// owned by the current process. Returns false if one cannot be built.
    pub fn ensure_backends_ready(&mut self) -> bool {
        let pid = (self.pid_source)();
        if let BackendState::Ready { pid: owner, .. } = &self.state {
            if *owner == pid {
                return true;
            }
            debug!("Process changed from {owner} to {pid}; recreating backends");
        }
        self.state = BackendState::Uninitialized;

        let relational = if self.routing.needs_relational() {
            match self.factory.relational() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!("Relational backend is unavailable: {e}");
                    return false;
                }
            }
        } else {
            None
        };
        let queue = if self.routing.needs_queue() {
            match self.factory.queue() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!("Queue backend is unavailable: {e}");
                    return false;
                }
            }
        } else {
            None
        };

        debug!("Backends ready for process {pid}");
        self.state = BackendState::Ready {
            pid,
            relational,
            queue,
        };
        true
    }

    fn relational(&mut self) -> Result<&dyn RelationalBackend> {
        const NAME: &str = "relational";
        if !self.ensure_backends_ready() {
            return Err(StoreError::BackendUnavailable(NAME));
        }
        match &self.state {
            BackendState::Ready {
                relational: Some(backend),
                ..
            } => Ok(&**backend),
            _ => Err(StoreError::BackendUnavailable(NAME)),
        }
    }

    fn queue(&mut self) -> Result<&dyn QueueBackend> {
        const NAME: &str = "queue";
        if !self.ensure_backends_ready() {
            return Err(StoreError::BackendUnavailable(NAME));
        }
        match &self.state {
            BackendState::Ready {
                queue: Some(backend),
                ..
            } => Ok(&**backend),
            _ => Err(StoreError::BackendUnavailable(NAME)),
        }
    }

    /// Records a new build. Returns `None` when relational writes are
    /// disabled.
    pub fn insert_build(&mut self, build: &NewBuild) -> Result<Option<BuildId>> {
        if !self.routing.write_to_relational {
            return Ok(None);
        }
        Ok(Some(self.relational()?.insert_build(build)?))
    }

    /// Records a new stage of `build_id`. Returns `None` when relational
    /// writes are disabled.
    pub fn insert_build_stage(
        &mut self,
        build_id: BuildId,
        name: &str,
        board: Option<&str>,
        status: BuildStatus,
    ) -> Result<Option<StageId>> {
        if !self.routing.write_to_relational {
            return Ok(None);
        }
        Ok(Some(
            self.relational()?
                .insert_build_stage(build_id, name, board, status)?,
        ))
    }

    /// Marks a stage as started. Returns whether anything was written.
    pub fn start_build_stage(&mut self, stage_id: StageId) -> Result<bool> {
        if !self.routing.write_to_relational {
            return Ok(false);
        }
        self.relational()?.start_build_stage(stage_id)?;
        Ok(true)
    }

    /// Marks a stage as finished. Returns whether anything was written.
    pub fn finish_build_stage(&mut self, stage_id: StageId, status: BuildStatus) -> Result<bool> {
        if !self.routing.write_to_relational {
            return Ok(false);
        }
        self.relational()?.finish_build_stage(stage_id, status)?;
        Ok(true)
    }

    /// Marks a build as finished. Returns whether anything was written.
    pub fn finish_build(
        &mut self,
        build_id: BuildId,
        status: BuildStatus,
        summary: Option<&str>,
    ) -> Result<bool> {
        if !self.routing.write_to_relational {
            return Ok(false);
        }
        self.relational()?.finish_build(build_id, status, summary)?;
        Ok(true)
    }

    /// Stores the metadata of a build. Returns whether anything was written.
    pub fn update_metadata(&mut self, build_id: BuildId, metadata: &BuildMetadata) -> Result<bool> {
        if !self.routing.write_to_relational {
            return Ok(false);
        }
        self.relational()?.update_metadata(build_id, metadata)?;
        Ok(true)
    }

    /// Fetches build statuses from exactly one backend.
    ///
    /// When reading from the queue, `queue_ids` are required. Otherwise the
    /// relational backend is asked by `queue_ids` if any are given, and by
    /// `build_ids` if not.
    pub fn get_build_statuses(
        &mut self,
        build_ids: &[BuildId],
        queue_ids: &[String],
    ) -> Result<Vec<BuildRecord>> {
        if build_ids.is_empty() && queue_ids.is_empty() {
            return Err(StoreError::Configuration(
                "get_build_statuses needs build ids or queue ids".into(),
            ));
        }
        if self.routing.read_from_queue {
            if queue_ids.is_empty() {
                return Err(StoreError::Configuration(
                    "reading from the queue backend needs queue ids".into(),
                ));
            }
            return Ok(self.queue()?.get_build_statuses_with_queue_ids(queue_ids)?);
        }

        let relational = self.relational()?;
        if queue_ids.is_empty() {
            Ok(relational.get_build_statuses(build_ids)?)
        } else {
            Ok(relational.get_build_statuses_with_queue_ids(queue_ids)?)
        }
    }

    pub fn get_builds_stages(&mut self, build_ids: &[BuildId]) -> Result<Vec<StageRecord>> {
        Ok(self.relational()?.get_builds_stages(build_ids)?)
    }

    /// Returns up to `limit` builds of `build_config` started within the
    /// inclusive date range, newest first.
    pub fn get_build_history(
        &mut self,
        build_config: &str,
        limit: Option<usize>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<BuildRecord>> {
        let query = HistoryQuery {
            limit,
            start_date,
            end_date,
        };
        Ok(self.relational()?.get_build_history(build_config, &query)?)
    }

    pub fn get_slave_statuses(&mut self, master_build_id: BuildId) -> Result<Vec<BuildRecord>> {
        Ok(self.relational()?.get_slave_statuses(master_build_id)?)
    }
}
