// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{path::Path, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, types::Type, Connection, Row, ToSql};
use tracing::debug;

use crate::{
    backend::{BackendResult, HistoryQuery, RelationalBackend},
    error::BackendError,
    record::{BuildId, BuildMetadata, BuildRecord, BuildStatus, NewBuild, StageId, StageRecord},
};

const BUILD_COLUMNS: &str = "id, build_config, builder_name, build_number, start_time, \
     finish_time, status, waterfall, master_build_id, buildbucket_id, platform_version, \
     full_version, summary";

const STAGE_COLUMNS: &str = "id, build_id, name, board, status, start_time, finish_time";

const MAX_SUMMARY_LEN: usize = 1024;

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// A CIDB stored in a SQLite database.
pub struct SqliteCidb {
    conn: Connection,
    clock: Clock,
}

impl SqliteCidb {
    /// Opens or creates the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        debug!("Opening CIDB at {}", path.display());
        Self::init_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> BackendResult<Self> {
        Self::init_connection(Connection::open_in_memory()?)
    }

    fn init_connection(conn: Connection) -> BackendResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn,
            clock: Box::new(Utc::now),
        })
    }

    /// Replaces the source of the timestamps recorded by writes.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn now_millis(&self) -> i64 {
        (self.clock)().timestamp_millis()
    }

    fn select_builds(&self, clause: &str, args: &[&dyn ToSql]) -> BackendResult<Vec<BuildRecord>> {
        let sql = format!("SELECT {BUILD_COLUMNS} FROM buildTable WHERE {clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let builds = stmt
            .query_map(args, build_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for build in &builds {
            build.validate()?;
        }
        Ok(builds)
    }

    fn select_builds_in<T: ToSql>(
        &self,
        column: &str,
        values: &[T],
    ) -> BackendResult<Vec<BuildRecord>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {BUILD_COLUMNS} FROM buildTable WHERE {column} IN ({}) ORDER BY id",
            placeholders(values.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let builds = stmt
            .query_map(params_from_iter(values), build_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for build in &builds {
            build.validate()?;
        }
        Ok(builds)
    }

    fn expect_one_row(updated: usize, what: impl FnOnce() -> String) -> BackendResult<()> {
        if updated == 0 {
            return Err(BackendError::NotFound(what()));
        }
        Ok(())
    }
}

impl RelationalBackend for SqliteCidb {
    fn insert_build(&self, build: &NewBuild) -> BackendResult<BuildId> {
        self.conn.execute(
            "INSERT INTO buildTable (builder_name, build_number, build_config, bot_hostname, \
             master_build_id, buildbucket_id, waterfall, branch, status, start_time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                build.builder_name,
                build.build_number,
                build.build_config,
                build.bot_hostname,
                build.master_build_id,
                build.buildbucket_id,
                build.waterfall,
                build.branch,
                BuildStatus::Started.as_ref(),
                self.now_millis(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_build_stage(
        &self,
        build_id: BuildId,
        name: &str,
        board: Option<&str>,
        status: BuildStatus,
    ) -> BackendResult<StageId> {
        self.conn.execute(
            "INSERT INTO buildStageTable (build_id, name, board, status) VALUES (?1, ?2, ?3, ?4)",
            params![build_id, name, board, status.as_ref()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn start_build_stage(&self, stage_id: StageId) -> BackendResult<()> {
        let updated = self.conn.execute(
            "UPDATE buildStageTable SET status = ?1, start_time = ?2 WHERE id = ?3",
            params![BuildStatus::Started.as_ref(), self.now_millis(), stage_id],
        )?;
        Self::expect_one_row(updated, || format!("stage {stage_id}"))
    }

    fn finish_build_stage(&self, stage_id: StageId, status: BuildStatus) -> BackendResult<()> {
        let updated = self.conn.execute(
            "UPDATE buildStageTable SET status = ?1, finish_time = ?2, final = 1 WHERE id = ?3",
            params![status.as_ref(), self.now_millis(), stage_id],
        )?;
        Self::expect_one_row(updated, || format!("stage {stage_id}"))
    }

    fn finish_build(
        &self,
        build_id: BuildId,
        status: BuildStatus,
        summary: Option<&str>,
    ) -> BackendResult<()> {
        let summary = summary.map(|s| s.chars().take(MAX_SUMMARY_LEN).collect::<String>());
        let updated = self.conn.execute(
            "UPDATE buildTable SET status = ?1, summary = COALESCE(?2, summary), \
             finish_time = ?3, final = 1 WHERE id = ?4 AND final = 0",
            params![status.as_ref(), summary, self.now_millis(), build_id],
        )?;
        Self::expect_one_row(updated, || format!("unfinished build {build_id}"))
    }

    fn update_metadata(&self, build_id: BuildId, metadata: &BuildMetadata) -> BackendResult<()> {
        let json = serde_json::to_string(metadata)?;
        let updated = self.conn.execute(
            "UPDATE buildTable SET platform_version = ?1, full_version = ?2, \
             branch = COALESCE(?3, branch), metadata_json = ?4 WHERE id = ?5",
            params![
                metadata.platform_version,
                metadata.full_version,
                metadata.branch,
                json,
                build_id
            ],
        )?;
        Self::expect_one_row(updated, || format!("build {build_id}"))
    }

    fn get_build_statuses(&self, build_ids: &[BuildId]) -> BackendResult<Vec<BuildRecord>> {
        self.select_builds_in("id", build_ids)
    }

    fn get_build_statuses_with_queue_ids(
        &self,
        queue_ids: &[String],
    ) -> BackendResult<Vec<BuildRecord>> {
        self.select_builds_in("buildbucket_id", queue_ids)
    }

    fn get_builds_stages(&self, build_ids: &[BuildId]) -> BackendResult<Vec<StageRecord>> {
        if build_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {STAGE_COLUMNS} FROM buildStageTable WHERE build_id IN ({}) \
             ORDER BY build_id, id",
            placeholders(build_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let stages = stmt
            .query_map(params_from_iter(build_ids), stage_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for stage in &stages {
            stage.validate()?;
        }
        Ok(stages)
    }

    fn get_build_history(
        &self,
        build_config: &str,
        query: &HistoryQuery,
    ) -> BackendResult<Vec<BuildRecord>> {
        // Date bounds are inclusive: [start of start_date, start of the day after end_date).
        let lower = query.start_date.map(start_of_day_millis);
        let upper = query
            .end_date
            .and_then(|date| date.succ_opt())
            .map(start_of_day_millis);
        let limit = query
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        self.select_builds(
            "build_config = ?1 \
             AND (?2 IS NULL OR start_time >= ?2) \
             AND (?3 IS NULL OR start_time < ?3) \
             ORDER BY start_time DESC, id DESC LIMIT ?4",
            &[&build_config, &lower, &upper, &limit],
        )
    }

    fn get_slave_statuses(&self, master_build_id: BuildId) -> BackendResult<Vec<BuildRecord>> {
        self.select_builds("master_build_id = ?1 ORDER BY id", &[&master_build_id])
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn start_of_day_millis(date: NaiveDate) -> i64 {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
        .timestamp_millis()
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(millis) = row.get::<_, Option<i64>>(idx)? else {
        return Ok(None);
    };
    match Utc.timestamp_millis_opt(millis).single() {
        Some(time) => Ok(Some(time)),
        None => Err(rusqlite::Error::IntegralValueOutOfRange(idx, millis)),
    }
}

fn status(row: &Row, idx: usize) -> rusqlite::Result<BuildStatus> {
    let value: String = row.get(idx)?;
    BuildStatus::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn build_from_row(row: &Row) -> rusqlite::Result<BuildRecord> {
    Ok(BuildRecord {
        id: row.get(0)?,
        build_config: row.get(1)?,
        builder_name: row.get(2)?,
        build_number: row.get(3)?,
        start_time: timestamp(row, 4)?,
        finish_time: timestamp(row, 5)?,
        status: status(row, 6)?,
        waterfall: row.get(7)?,
        master_build_id: row.get(8)?,
        buildbucket_id: row.get(9)?,
        platform_version: row.get(10)?,
        full_version: row.get(11)?,
        summary: row.get(12)?,
        stages: Vec::new(),
    })
}

fn stage_from_row(row: &Row) -> rusqlite::Result<StageRecord> {
    Ok(StageRecord {
        id: row.get(0)?,
        build_id: row.get(1)?,
        name: row.get(2)?,
        board: row.get(3)?,
        status: status(row, 4)?,
        start_time: timestamp(row, 5)?,
        finish_time: timestamp(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{cell::Cell, rc::Rc};

    /// A CIDB whose clock is driven by the returned cell (seconds since epoch).
    fn cidb() -> Result<(SqliteCidb, Rc<Cell<i64>>)> {
        let now = Rc::new(Cell::new(1_700_000_000));
        let clock = now.clone();
        let cidb = SqliteCidb::open_in_memory()?
            .with_clock(move || Utc.timestamp_opt(clock.get(), 0).unwrap());
        Ok((cidb, now))
    }

    fn new_build(config: &str, number: i64) -> NewBuild {
        NewBuild {
            builder_name: format!("{config}-builder"),
            build_number: number,
            build_config: config.to_owned(),
            bot_hostname: "bot1".to_owned(),
            waterfall: "chromeos".to_owned(),
            ..Default::default()
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    #[test]
    fn test_insert_and_get_build() -> Result<()> {
        let (cidb, _) = cidb()?;
        let id = cidb.insert_build(&NewBuild {
            buildbucket_id: Some("8921".to_owned()),
            ..new_build("eve-release", 7)
        })?;

        let builds = cidb.get_build_statuses(&[id])?;
        assert_eq!(1, builds.len());
        let build = &builds[0];
        assert_eq!(id, build.id);
        assert_eq!("eve-release", build.build_config);
        assert_eq!(Some(7), build.build_number);
        assert_eq!(BuildStatus::Started, build.status);
        assert_eq!(Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()), build.start_time);
        assert_eq!(None, build.finish_time);

        let by_queue_id = cidb.get_build_statuses_with_queue_ids(&["8921".to_owned()])?;
        assert_eq!(builds, by_queue_id);
        assert!(cidb.get_build_statuses(&[])?.is_empty());
        assert!(cidb.get_build_statuses(&[id + 100])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_finish_build() -> Result<()> {
        let (cidb, now) = cidb()?;
        let id = cidb.insert_build(&new_build("eve-release", 1))?;
        now.set(now.get() + 3600);
        cidb.finish_build(id, BuildStatus::Failed, Some("HWTest failed"))?;

        let build = &cidb.get_build_statuses(&[id])?[0];
        assert_eq!(BuildStatus::Failed, build.status);
        assert_eq!(Some("HWTest failed"), build.summary.as_deref());
        assert_eq!(
            Some(Utc.timestamp_opt(1_700_003_600, 0).unwrap()),
            build.finish_time
        );

        // A build is finished only once.
        let err = cidb.finish_build(id, BuildStatus::Passed, None).unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)), "{err:?}");
        Ok(())
    }

    #[test]
    fn test_stages() -> Result<()> {
        let (cidb, now) = cidb()?;
        let id = cidb.insert_build(&new_build("eve-release", 1))?;
        let sync = cidb.insert_build_stage(id, "SyncStage", None, BuildStatus::Planned)?;
        let build = cidb.insert_build_stage(id, "BuildPackages", Some("eve"), BuildStatus::Planned)?;

        now.set(now.get() + 10);
        cidb.start_build_stage(sync)?;
        now.set(now.get() + 50);
        cidb.finish_build_stage(sync, BuildStatus::Passed)?;
        cidb.start_build_stage(build)?;

        let stages = cidb.get_builds_stages(&[id])?;
        assert_eq!(2, stages.len());
        assert_eq!("SyncStage", stages[0].name);
        assert_eq!(BuildStatus::Passed, stages[0].status);
        assert_eq!(
            Some(Utc.timestamp_opt(1_700_000_010, 0).unwrap()),
            stages[0].start_time
        );
        assert_eq!(
            Some(Utc.timestamp_opt(1_700_000_060, 0).unwrap()),
            stages[0].finish_time
        );
        assert_eq!(Some("eve"), stages[1].board.as_deref());
        assert_eq!(BuildStatus::Started, stages[1].status);
        assert_eq!(None, stages[1].finish_time);

        assert!(cidb.get_builds_stages(&[])?.is_empty());
        assert!(matches!(
            cidb.start_build_stage(build + 100),
            Err(BackendError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_stage_requires_existing_build() -> Result<()> {
        let (cidb, _) = cidb()?;
        let err = cidb
            .insert_build_stage(42, "SyncStage", None, BuildStatus::Planned)
            .unwrap_err();
        assert!(matches!(err, BackendError::Sqlite(_)), "{err:?}");
        Ok(())
    }

    #[test]
    fn test_corrupt_stage_times() -> Result<()> {
        let (cidb, _) = cidb()?;
        let id = cidb.insert_build(&new_build("eve-release", 1))?;
        let stage = cidb.insert_build_stage(id, "SyncStage", None, BuildStatus::Planned)?;
        cidb.conn.execute(
            "UPDATE buildStageTable SET start_time = 2000, finish_time = 1000 WHERE id = ?1",
            params![stage],
        )?;
        let err = cidb.get_builds_stages(&[id]).unwrap_err();
        assert!(matches!(err, BackendError::CorruptRecord(_)), "{err:?}");
        Ok(())
    }

    #[test]
    fn test_unknown_status_is_an_error() -> Result<()> {
        let (cidb, _) = cidb()?;
        let id = cidb.insert_build(&new_build("eve-release", 1))?;
        cidb.conn.execute(
            "UPDATE buildTable SET status = 'exploded' WHERE id = ?1",
            params![id],
        )?;
        assert!(matches!(
            cidb.get_build_statuses(&[id]),
            Err(BackendError::Sqlite(_))
        ));
        Ok(())
    }

    #[test]
    fn test_update_metadata() -> Result<()> {
        let (cidb, _) = cidb()?;
        let id = cidb.insert_build(&new_build("eve-release", 1))?;
        cidb.update_metadata(
            id,
            &BuildMetadata {
                platform_version: Some("15000.0.0".to_owned()),
                full_version: Some("R120-15000.0.0".to_owned()),
                ..Default::default()
            },
        )?;
        let build = &cidb.get_build_statuses(&[id])?[0];
        assert_eq!(Some("15000.0.0"), build.platform_version.as_deref());
        assert_eq!(Some("R120-15000.0.0"), build.full_version.as_deref());

        let json: String = cidb.conn.query_row(
            "SELECT metadata_json FROM buildTable WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let parsed: BuildMetadata = serde_json::from_str(&json)?;
        assert_eq!(Some("15000.0.0"), parsed.platform_version.as_deref());

        assert!(matches!(
            cidb.update_metadata(id + 1, &BuildMetadata::default()),
            Err(BackendError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_build_history() -> Result<()> {
        let (cidb, now) = cidb()?;
        // 2023-11-14 22:13:20 UTC, then one build per day.
        let mut ids = Vec::new();
        for number in 0..5 {
            ids.push(cidb.insert_build(&new_build("eve-release", number))?);
            cidb.insert_build(&new_build("kevin-release", number))?;
            now.set(now.get() + 86400);
        }

        let history = cidb.get_build_history("eve-release", &HistoryQuery::default())?;
        let history_ids: Vec<BuildId> = history.iter().map(|b| b.id).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(expected, history_ids);

        let limited = cidb.get_build_history(
            "eve-release",
            &HistoryQuery {
                limit: Some(2),
                ..Default::default()
            },
        )?;
        assert_eq!(vec![ids[4], ids[3]], limited.iter().map(|b| b.id).collect::<Vec<_>>());

        let ranged = cidb.get_build_history(
            "eve-release",
            &HistoryQuery {
                start_date: Some(date("2023-11-15")),
                end_date: Some(date("2023-11-17")),
                ..Default::default()
            },
        )?;
        assert_eq!(
            vec![ids[3], ids[2], ids[1]],
            ranged.iter().map(|b| b.id).collect::<Vec<_>>()
        );

        assert!(cidb
            .get_build_history("unknown", &HistoryQuery::default())?
            .is_empty());
        Ok(())
    }

    #[test]
    fn test_slave_statuses() -> Result<()> {
        let (cidb, _) = cidb()?;
        let master = cidb.insert_build(&new_build("master-release", 1))?;
        let slave1 = cidb.insert_build(&NewBuild {
            master_build_id: Some(master),
            ..new_build("eve-release", 1)
        })?;
        let slave2 = cidb.insert_build(&NewBuild {
            master_build_id: Some(master),
            ..new_build("kevin-release", 1)
        })?;
        cidb.insert_build(&new_build("unrelated", 1))?;

        let slaves = cidb.get_slave_statuses(master)?;
        assert_eq!(vec![slave1, slave2], slaves.iter().map(|b| b.id).collect::<Vec<_>>());
        assert_eq!(Some(master), slaves[0].master_build_id);
        Ok(())
    }

    #[test]
    fn test_open_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cidb.sqlite");
        let id = SqliteCidb::open(&path)?.insert_build(&new_build("eve-release", 1))?;
        let reopened = SqliteCidb::open(&path)?;
        assert_eq!(1, reopened.get_build_statuses(&[id])?.len());
        Ok(())
    }
}
