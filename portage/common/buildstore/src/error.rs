// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

/// Errors raised by a single backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend is not configured: {0}")]
    NotConfigured(String),

    #[error("failed to read credentials from {path:?}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("no such record: {0}")]
    NotFound(String),

    #[error("HTTP request to {url} failed with {status}: {body}")]
    Http {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Whether retrying the same request may succeed: server-side HTTP
    /// failures and transport errors are, client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Http { status, .. } => status.is_server_error(),
            BackendError::Transport(e) => !e.status().is_some_and(|s| s.is_client_error()),
            _ => false,
        }
    }
}

/// Errors raised by [`crate::BuildStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The call itself is malformed, e.g. no ids were given.
    #[error("invalid build store call: {0}")]
    Configuration(String),

    /// A backend needed by the call could not be constructed.
    #[error("{0} backend is not available")]
    BackendUnavailable(&'static str),

    #[error("failed to load build store config from {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
