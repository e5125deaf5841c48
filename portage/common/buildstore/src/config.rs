// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use crate::{
    backend::{BackendFactory, BackendResult, QueueBackend, RelationalBackend},
    buildbucket::{BuildbucketClient, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY},
    cidb::SqliteCidb,
    error::{BackendError, Result, StoreError},
};

/// Build store settings, usually read from a TOML file:
///
/// ```toml
/// read_from_queue = false
/// write_to_relational = true
///
/// [cidb]
/// path = "/var/lib/cidb.sqlite"
///
/// [buildbucket]
/// host = "cr-buildbucket.appspot.com"
/// token_file = "/creds/buildbucket_token"
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildStoreConfig {
    pub read_from_queue: bool,
    pub write_to_queue: bool,
    pub write_to_relational: bool,
    pub cidb: Option<CidbConfig>,
    pub buildbucket: Option<BuildbucketConfig>,
}

impl Default for BuildStoreConfig {
    fn default() -> Self {
        Self {
            read_from_queue: false,
            write_to_queue: false,
            write_to_relational: true,
            cidb: None,
            buildbucket: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CidbConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildbucketConfig {
    pub host: String,
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

impl BuildStoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config_error = |reason: String| StoreError::Config {
            path: path.to_owned(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        text.parse().map_err(|e: toml::de::Error| config_error(e.to_string()))
    }
}

impl FromStr for BuildStoreConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

/// Builds a [`SqliteCidb`] and a [`BuildbucketClient`] from a
/// [`BuildStoreConfig`].
#[derive(Clone, Debug)]
pub struct DefaultBackendFactory {
    config: BuildStoreConfig,
}

impl DefaultBackendFactory {
    pub fn new(config: BuildStoreConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn relational(&self) -> BackendResult<Box<dyn RelationalBackend>> {
        let cidb = self
            .config
            .cidb
            .as_ref()
            .ok_or_else(|| BackendError::NotConfigured("missing [cidb] section".into()))?;
        Ok(Box::new(SqliteCidb::open(&cidb.path)?))
    }

    fn queue(&self) -> BackendResult<Box<dyn QueueBackend>> {
        let bb = self
            .config
            .buildbucket
            .as_ref()
            .ok_or_else(|| BackendError::NotConfigured("missing [buildbucket] section".into()))?;
        let mut client = BuildbucketClient::new(&bb.host)?
            .with_retries(bb.max_attempts, Duration::from_millis(bb.retry_delay_ms));
        if let Some(path) = &bb.token_file {
            debug!("Reading Buildbucket token from {}", path.display());
            let token = std::fs::read_to_string(path).map_err(|source| BackendError::Credentials {
                path: path.clone(),
                source,
            })?;
            client = client.with_token(token.trim());
        }
        Ok(Box::new(client))
    }
}
