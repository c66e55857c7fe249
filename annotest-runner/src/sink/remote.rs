// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Annotation, AnnotationSink, CheckRunHandle, Conclusion};
use crate::{config::RemoteCredentials, errors::SinkError};
use debug_ignore::DebugIgnore;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};
use ureq::Agent;

const USER_AGENT: &str = concat!("annotest/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// Posts annotations to a check run through the REST API.
///
/// `ureq` is a blocking client: every request runs on tokio's blocking pool.
#[derive(Clone, Debug)]
pub struct CheckRunSink {
    inner: Arc<CheckRunClient>,
}

impl CheckRunSink {
    /// Creates a new sink from credentials.
    ///
    /// Each request, including connecting and reading the response, must finish within
    /// `request_timeout`.
    pub fn new(credentials: RemoteCredentials, request_timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(request_timeout))
            .build()
            .into();
        Self {
            inner: Arc::new(CheckRunClient {
                agent: DebugIgnore(agent),
                credentials,
            }),
        }
    }

    async fn request(
        &self,
        operation: &'static str,
        method: Method,
        path: String,
        body: Value,
    ) -> Result<CheckRunHandle, SinkError> {
        let client = self.inner.clone();
        tokio::task::spawn_blocking(move || client.send(operation, method, &path, &body))
            .await
            .map_err(|err| SinkError::TaskJoin { operation, err })?
    }
}

impl AnnotationSink for CheckRunSink {
    async fn open(&self, title: &str) -> Result<CheckRunHandle, SinkError> {
        let body = create_body(title, &self.inner.credentials.sha);
        let handle = self
            .request("create check run", Method::Post, self.inner.check_runs_path(), body)
            .await?;
        debug!(id = ?handle.id, "created check run `{}`", handle.name);
        Ok(handle)
    }

    async fn emit(
        &self,
        handle: &CheckRunHandle,
        annotation: &Annotation,
    ) -> Result<CheckRunHandle, SinkError> {
        let Some(body) = annotate_body(handle, annotation) else {
            // Check run annotations must name a file in the repository.
            warn!(
                "skipping annotation without a source location: {}",
                annotation.title.as_deref().unwrap_or(&annotation.message),
            );
            return Ok(handle.clone());
        };
        let path = self.inner.check_run_path(handle)?;
        self.request("update check run", Method::Patch, path, body).await
    }

    async fn close(&self, handle: CheckRunHandle, conclusion: Conclusion) -> Result<(), SinkError> {
        let path = self.inner.check_run_path(&handle)?;
        self.request(
            "complete check run",
            Method::Patch,
            path,
            complete_body(&handle, conclusion),
        )
        .await?;
        Ok(())
    }
}

#[derive(Copy, Clone, Debug)]
enum Method {
    Post,
    Patch,
}

#[derive(Debug)]
struct CheckRunClient {
    agent: DebugIgnore<Agent>,
    credentials: RemoteCredentials,
}

impl CheckRunClient {
    fn check_runs_path(&self) -> String {
        let RemoteCredentials {
            api_url,
            owner,
            repository,
            ..
        } = &self.credentials;
        format!("{api_url}/repos/{owner}/{repository}/check-runs")
    }

    fn check_run_path(&self, handle: &CheckRunHandle) -> Result<String, SinkError> {
        let id = handle.id.ok_or_else(|| SinkError::MissingCheckRunId {
            name: handle.name.clone(),
        })?;
        Ok(format!("{}/{id}", self.check_runs_path()))
    }

    fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        body: &Value,
    ) -> Result<CheckRunHandle, SinkError> {
        let authorization = format!("Bearer {}", self.credentials.token.0);
        let result = match method {
            Method::Post => self
                .agent
                .post(url)
                .header("Authorization", authorization.as_str())
                .header("User-Agent", USER_AGENT)
                .header("Accept", ACCEPT)
                .header("X-GitHub-Api-Version", API_VERSION)
                .send_json(body),
            Method::Patch => self
                .agent
                .patch(url)
                .header("Authorization", authorization.as_str())
                .header("User-Agent", USER_AGENT)
                .header("Accept", ACCEPT)
                .header("X-GitHub-Api-Version", API_VERSION)
                .send_json(body),
        };
        let mut response = result.map_err(|err| SinkError::Transport {
            operation,
            err: Box::new(err),
        })?;

        check_status(operation, response.status().as_u16())?;
        response
            .body_mut()
            .read_json()
            .map_err(|err| SinkError::Transport {
                operation,
                err: Box::new(err),
            })
    }
}

fn check_status(operation: &'static str, status: u16) -> Result<(), SinkError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(SinkError::Authentication { status }),
        429 => Err(SinkError::RateLimited),
        status => Err(SinkError::HttpStatus { operation, status }),
    }
}

fn create_body(title: &str, sha: &str) -> Value {
    json!({
        "name": title,
        "head_sha": sha,
        "status": "queued",
        "output": {
            "title": title,
            "summary": "Starting...",
        },
    })
}

fn annotate_body(handle: &CheckRunHandle, annotation: &Annotation) -> Option<Value> {
    let annotation = annotation_json(annotation)?;
    Some(json!({
        "name": handle.name,
        "status": "in_progress",
        "output": {
            "title": handle.name,
            "summary": "In progress...",
            "annotations": [annotation],
        },
    }))
}

fn complete_body(handle: &CheckRunHandle, conclusion: Conclusion) -> Value {
    json!({
        "name": handle.name,
        "status": "completed",
        "conclusion": conclusion.as_str(),
        "output": {
            "title": handle.name,
            "summary": "Completed",
        },
    })
}

/// Returns `None` for annotations without a file, which the API rejects.
fn annotation_json(annotation: &Annotation) -> Option<Value> {
    let path = annotation
        .file
        .as_deref()
        .filter(|file| !file.trim().is_empty())?;
    // A file without a line is annotated at its first line.
    let start_line = annotation.start_line.unwrap_or(1);
    let end_line = annotation.end_line.unwrap_or(start_line);

    let mut value = json!({
        "path": path,
        "start_line": start_line,
        "end_line": end_line,
        "annotation_level": annotation.severity.annotation_level(),
        "message": annotation.message,
    });
    if let Some(title) = &annotation.title {
        value["title"] = json!(title);
    }
    // Columns are only accepted on single-line annotations.
    if start_line == end_line {
        if let Some(column) = annotation.column {
            value["start_column"] = json!(column);
        }
        if let Some(end_column) = annotation.end_column {
            value["end_column"] = json!(end_column);
        }
    }
    Some(value)
}
