// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Destinations for annotations.
//!
//! An [`AnnotationSink`] knows how to open a run's annotation resource, post annotations to it,
//! and close it. The pipeline serializes every call, so implementations don't need to handle
//! concurrent mutation of one resource.
//!
//! Two sinks are provided:
//!
//! * [`ConsoleSink`] writes workflow commands to standard output, for the CI runner to pick up.
//! * [`CheckRunSink`] talks to the check-run REST API.
//!
//! [`AnyAnnotationSink`] picks one of them once, when the pipeline is constructed.

mod console;
mod remote;

pub use console::ConsoleSink;
pub use remote::CheckRunSink;

use crate::{config::PipelineConfig, errors::SinkError};
use serde::Deserialize;
use std::{fmt, future::Future};
use tracing::debug;

/// A destination for annotations.
pub trait AnnotationSink: Send + Sync + 'static {
    /// Opens the annotation resource for a run.
    ///
    /// Called at most once per pipeline.
    fn open(&self, title: &str) -> impl Future<Output = Result<CheckRunHandle, SinkError>> + Send;

    /// Posts one annotation, returning the updated handle.
    fn emit(
        &self,
        handle: &CheckRunHandle,
        annotation: &Annotation,
    ) -> impl Future<Output = Result<CheckRunHandle, SinkError>> + Send;

    /// Closes the annotation resource with the run's conclusion.
    fn close(
        &self,
        handle: CheckRunHandle,
        conclusion: Conclusion,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Identifies an open annotation resource.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CheckRunHandle {
    /// The remote identifier, if the resource lives remotely.
    #[serde(default)]
    pub id: Option<u64>,

    /// The resource name.
    pub name: String,

    /// The resource's last known status.
    pub status: CheckRunStatus,
}

impl CheckRunHandle {
    /// Creates a handle for a resource that only exists locally.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            status: CheckRunStatus::InProgress,
        }
    }
}

/// The status of an annotation resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    /// Created, no annotations posted yet.
    Queued,

    /// Annotations are being posted.
    InProgress,

    /// Closed.
    Completed,

    /// Any status this version doesn't know about.
    #[serde(other)]
    Unknown,
}

/// The severity of an annotation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational.
    Notice,

    /// A warning.
    Warning,

    /// An error.
    Error,
}

impl Severity {
    /// Returns the workflow command name for this severity.
    pub fn command_name(self) -> &'static str {
        match self {
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    /// Returns the check-run annotation level for this severity.
    pub fn annotation_level(self) -> &'static str {
        match self {
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "failure",
        }
    }
}

/// A single annotation attached to a source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// The severity.
    pub severity: Severity,

    /// The message body.
    pub message: String,

    /// A short title.
    pub title: Option<String>,

    /// The workspace-relative file.
    pub file: Option<String>,

    /// The first line.
    pub start_line: Option<u32>,

    /// The last line.
    pub end_line: Option<u32>,

    /// The first column.
    pub column: Option<u32>,

    /// The last column.
    pub end_column: Option<u32>,
}

impl Annotation {
    /// Creates an annotation with no location.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            title: None,
            file: None,
            start_line: None,
            end_line: None,
            column: None,
            end_column: None,
        }
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the file and, if known, the single line the annotation covers.
    pub fn with_location(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.start_line = line;
        self.end_line = line;
        self
    }
}

/// The overall conclusion of a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Conclusion {
    /// Every test passed or was skipped.
    Success,

    /// At least one test failed.
    Failure,

    /// The run was aborted or cancelled.
    Cancelled,

    /// No conclusion could be drawn.
    Neutral,
}

impl Conclusion {
    /// Returns the check-run API name of this conclusion.
    pub fn as_str(self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Cancelled => "cancelled",
            Conclusion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either of the built-in sinks, selected from configuration.
#[derive(Debug)]
pub enum AnyAnnotationSink {
    /// Workflow commands on standard output.
    Console(ConsoleSink),

    /// The check-run API.
    Remote(CheckRunSink),
}

impl AnyAnnotationSink {
    /// Selects a sink based on `config`.
    ///
    /// The check-run API is used when [`PipelineConfig::remote_credentials`] returns credentials.
    /// Otherwise annotations go to standard output.
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.remote_credentials() {
            Some(credentials) => {
                debug!(
                    "posting annotations to check runs on {}/{}",
                    credentials.owner, credentials.repository,
                );
                AnyAnnotationSink::Remote(CheckRunSink::new(credentials, config.gate_timeout))
            }
            None => {
                debug!("writing annotations as workflow commands");
                AnyAnnotationSink::Console(ConsoleSink::stdout(config.echo))
            }
        }
    }
}

impl AnnotationSink for AnyAnnotationSink {
    async fn open(&self, title: &str) -> Result<CheckRunHandle, SinkError> {
        match self {
            AnyAnnotationSink::Console(sink) => sink.open(title).await,
            AnyAnnotationSink::Remote(sink) => sink.open(title).await,
        }
    }

    async fn emit(
        &self,
        handle: &CheckRunHandle,
        annotation: &Annotation,
    ) -> Result<CheckRunHandle, SinkError> {
        match self {
            AnyAnnotationSink::Console(sink) => sink.emit(handle, annotation).await,
            AnyAnnotationSink::Remote(sink) => sink.emit(handle, annotation).await,
        }
    }

    async fn close(&self, handle: CheckRunHandle, conclusion: Conclusion) -> Result<(), SinkError> {
        match self {
            AnyAnnotationSink::Console(sink) => sink.close(handle, conclusion).await,
            AnyAnnotationSink::Remote(sink) => sink.close(handle, conclusion).await,
        }
    }
}
