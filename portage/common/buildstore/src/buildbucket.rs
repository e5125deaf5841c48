// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    backend::{BackendResult, QueueBackend},
    error::BackendError,
    record::{BuildRecord, BuildStatus, StageRecord},
};

/// Prefix prepended by pRPC servers to JSON responses to defeat XSSI.
const XSSI_PREFIX: &str = ")]}'";

const GET_BUILD_METHOD: &str = "buildbucket.v2.Builds/GetBuild";

const GET_BUILD_FIELDS: &str = "id,builder,number,status,startTime,endTime,steps,summaryMarkdown";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct GetBuildRequest<'a> {
    id: &'a str,
    fields: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildMessage {
    id: String,
    builder: BuilderId,
    number: Option<i64>,
    status: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    steps: Vec<StepMessage>,
    summary_markdown: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuilderId {
    bucket: String,
    builder: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepMessage {
    name: String,
    status: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

/// A Buildbucket v2 client talking pRPC over JSON.
pub struct BuildbucketClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::blocking::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl BuildbucketClient {
    /// Creates a client for `host`. A bare host name is reached over HTTPS.
    pub fn new(host: &str) -> BackendResult<Self> {
        let base_url = if host.contains("://") {
            host.trim_end_matches('/').to_owned()
        } else {
            format!("https://{host}")
        };
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("cros-buildstore/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url,
            token: None,
            http,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Sends `token` as a bearer token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = retry_delay;
        self
    }

    /// Fetches a single build by its Buildbucket id.
    #[instrument(skip(self))]
    pub fn get_build(&self, id: &str) -> BackendResult<BuildRecord> {
        with_retries(self.max_attempts, self.retry_delay, || self.get_build_once(id))
    }

    fn get_build_once(&self, id: &str) -> BackendResult<BuildRecord> {
        let url = format!("{}/prpc/{}", self.base_url, GET_BUILD_METHOD);
        debug!("POST {url}");
        let mut request = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&GetBuildRequest {
                id,
                fields: GET_BUILD_FIELDS,
            });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(BackendError::Http { url, status, body });
        }
        parse_build_response(&body)
    }
}

impl QueueBackend for BuildbucketClient {
    fn get_build_statuses_with_queue_ids(
        &self,
        queue_ids: &[String],
    ) -> BackendResult<Vec<BuildRecord>> {
        queue_ids.iter().map(|id| self.get_build(id)).collect()
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` attempts have been made. Sleeps `delay` between attempts.
pub fn with_retries<T>(
    max_attempts: u32,
    delay: Duration,
    mut f: impl FnMut() -> BackendResult<T>,
) -> BackendResult<T> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!("Attempt {attempt}/{max_attempts} failed: {e}; retrying in {delay:?}");
                std::thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Parses a `GetBuild` response body into a [`BuildRecord`]. Steps become
/// stages, numbered from 1 in response order.
pub fn parse_build_response(body: &str) -> BackendResult<BuildRecord> {
    let json = body.strip_prefix(XSSI_PREFIX).unwrap_or(body);
    let message: BuildMessage = serde_json::from_str(json)?;

    let id = message.id.parse().map_err(|_| {
        BackendError::InvalidResponse(format!("build id {:?} is not an integer", message.id))
    })?;
    let stages = message
        .steps
        .into_iter()
        .zip(1..)
        .map(|(step, stage_id)| {
            Ok(StageRecord {
                id: stage_id,
                build_id: id,
                status: parse_status(&step.status)?,
                name: step.name,
                board: None,
                start_time: step.start_time,
                finish_time: step.end_time,
            })
        })
        .collect::<BackendResult<Vec<_>>>()?;

    let build = BuildRecord {
        id,
        build_config: message.builder.builder.clone(),
        builder_name: message.builder.builder,
        build_number: message.number,
        start_time: message.start_time,
        finish_time: message.end_time,
        status: parse_status(&message.status)?,
        waterfall: message.builder.bucket,
        master_build_id: None,
        buildbucket_id: Some(message.id),
        platform_version: None,
        full_version: None,
        summary: message.summary_markdown,
        stages,
    };
    build.validate()?;
    Ok(build)
}

fn parse_status(status: &str) -> BackendResult<BuildStatus> {
    Ok(match status {
        "SCHEDULED" => BuildStatus::Planned,
        "STARTED" => BuildStatus::Started,
        "SUCCESS" => BuildStatus::Passed,
        "FAILURE" | "INFRA_FAILURE" => BuildStatus::Failed,
        "CANCELED" => BuildStatus::Aborted,
        _ => {
            return Err(BackendError::InvalidResponse(format!(
                "unknown build status {status:?}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::TimeZone;
    use std::{
        cell::Cell,
        io::{BufRead, BufReader, Read, Write},
        net::TcpListener,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread::JoinHandle,
    };

    const BUILD_RESPONSE: &str = r#")]}'
{
  "id": "8912345678901234567",
  "builder": {"project": "chromeos", "bucket": "postsubmit", "builder": "eve-postsubmit"},
  "number": 42,
  "status": "FAILURE",
  "startTime": "2023-11-14T22:13:20Z",
  "endTime": "2023-11-14T23:13:20.500Z",
  "summaryMarkdown": "HWTest failed",
  "steps": [
    {"name": "sync", "status": "SUCCESS",
     "startTime": "2023-11-14T22:13:25Z", "endTime": "2023-11-14T22:20:00Z"},
    {"name": "hwtest", "status": "FAILURE", "startTime": "2023-11-14T22:30:00Z"}
  ]
}"#;

    fn http_error(status: u16) -> BackendError {
        BackendError::Http {
            url: "https://example.com".to_owned(),
            status: reqwest::StatusCode::from_u16(status).unwrap(),
            body: String::new(),
        }
    }

    /// Serves one canned response per connection and counts requests.
    fn serve(responses: Vec<(u16, &'static str)>) -> Result<(String, Arc<AtomicUsize>, JoinHandle<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}", listener.local_addr()?);
        let count = Arc::new(AtomicUsize::new(0));
        let thread_count = count.clone();
        let handle = std::thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request_body = vec![0; content_length];
                reader.read_exact(&mut request_body).unwrap();
                thread_count.fetch_add(1, Ordering::SeqCst);

                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });
        Ok((url, count, handle))
    }

    #[test]
    fn test_parse_build_response() -> Result<()> {
        let build = parse_build_response(BUILD_RESPONSE)?;
        assert_eq!(8912345678901234567, build.id);
        assert_eq!(Some("8912345678901234567"), build.buildbucket_id.as_deref());
        assert_eq!("eve-postsubmit", build.build_config);
        assert_eq!("postsubmit", build.waterfall);
        assert_eq!(Some(42), build.build_number);
        assert_eq!(BuildStatus::Failed, build.status);
        assert_eq!(
            Some(Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap()),
            build.start_time
        );

        assert_eq!(2, build.stages.len());
        assert_eq!("sync", build.stages[0].name);
        assert_eq!(BuildStatus::Passed, build.stages[0].status);
        assert_eq!(2, build.stages[1].id);
        assert_eq!(None, build.stages[1].finish_time);
        Ok(())
    }

    #[test]
    fn test_parse_without_prefix() -> Result<()> {
        let body = BUILD_RESPONSE.strip_prefix(XSSI_PREFIX).unwrap();
        assert_eq!(parse_build_response(BUILD_RESPONSE)?, parse_build_response(body)?);
        Ok(())
    }

    #[test]
    fn test_parse_status() {
        for (text, status) in [
            ("SCHEDULED", BuildStatus::Planned),
            ("STARTED", BuildStatus::Started),
            ("SUCCESS", BuildStatus::Passed),
            ("FAILURE", BuildStatus::Failed),
            ("INFRA_FAILURE", BuildStatus::Failed),
            ("CANCELED", BuildStatus::Aborted),
        ] {
            assert_eq!(status, parse_status(text).unwrap());
        }
        assert!(matches!(
            parse_status("ENDED_MASK"),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_responses() {
        assert!(matches!(
            parse_build_response("<html>"),
            Err(BackendError::Json(_))
        ));
        let bad_id = BUILD_RESPONSE.replace("8912345678901234567", "abc");
        assert!(matches!(
            parse_build_response(&bad_id),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(http_error(500).is_retryable());
        assert!(http_error(503).is_retryable());
        assert!(!http_error(404).is_retryable());
        assert!(!http_error(403).is_retryable());
        assert!(!BackendError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_with_retries() {
        let calls = Cell::new(0);
        let result = with_retries(3, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(http_error(503))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(3, result.unwrap());

        calls.set(0);
        let result: BackendResult<()> = with_retries(5, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(http_error(404))
        });
        assert!(result.is_err());
        assert_eq!(1, calls.get());

        calls.set(0);
        let result: BackendResult<()> = with_retries(2, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(http_error(500))
        });
        assert!(result.is_err());
        assert_eq!(2, calls.get());
    }

    #[test]
    fn test_client_retries_server_errors() -> Result<()> {
        let (url, count, handle) = serve(vec![(503, "busy"), (500, "oops"), (200, BUILD_RESPONSE)])?;
        let client = BuildbucketClient::new(&url)?
            .with_token("secret")
            .with_retries(3, Duration::ZERO);

        let builds = client.get_build_statuses_with_queue_ids(&["8912345678901234567".to_owned()])?;
        assert_eq!(1, builds.len());
        assert_eq!(BuildStatus::Failed, builds[0].status);
        assert_eq!(3, count.load(Ordering::SeqCst));
        handle.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_client_fails_fast_on_client_errors() -> Result<()> {
        let (url, count, handle) = serve(vec![(404, "no such build")])?;
        let client = BuildbucketClient::new(&url)?.with_retries(3, Duration::ZERO);

        let err = client.get_build("1").unwrap_err();
        match err {
            BackendError::Http { status, body, .. } => {
                assert_eq!(404, status.as_u16());
                assert_eq!("no such build", body);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(1, count.load(Ordering::SeqCst));
        handle.join().unwrap();
        Ok(())
    }
}
