// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by annotest.

use crate::{events::ResultId, pipeline::RunState};
use camino::Utf8PathBuf;
use std::{error::Error, fmt, num::ParseIntError, time::Duration};
use thiserror::Error;

/// An error that occurred while assembling a [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The gate timeout could not be parsed as a whole number of seconds.
    #[error("invalid value for `{key}`: `{input}` (expected a whole number of seconds)")]
    InvalidLockTimeout {
        /// The configuration key that was read.
        key: &'static str,

        /// The input that failed to parse.
        input: String,

        /// The underlying parse error.
        #[source]
        err: ParseIntError,
    },

    /// The gate timeout was zero.
    #[error("`{key}` must be greater than zero")]
    ZeroLockTimeout {
        /// The configuration key that was read.
        key: &'static str,
    },
}

/// An error returned by an [`AnnotationSink`](crate::sink::AnnotationSink).
///
/// All of these are recoverable: the pipeline logs them and moves on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The remote API rejected the credentials.
    #[error("check-run API rejected the credentials (HTTP {status})")]
    Authentication {
        /// The HTTP status returned.
        status: u16,
    },

    /// The remote API is rate limiting requests.
    #[error("check-run API rate limit exceeded")]
    RateLimited,

    /// The remote API returned an unexpected HTTP status.
    #[error("check-run API returned HTTP {status} for {operation}")]
    HttpStatus {
        /// The operation being performed.
        operation: &'static str,

        /// The HTTP status returned.
        status: u16,
    },

    /// The request could not be sent or the response could not be read.
    #[error("error communicating with the check-run API during {operation}")]
    Transport {
        /// The operation being performed.
        operation: &'static str,

        /// The underlying error.
        #[source]
        err: Box<ureq::Error>,
    },

    /// The background task performing the request panicked or was cancelled.
    #[error("check-run API task for {operation} did not complete")]
    TaskJoin {
        /// The operation being performed.
        operation: &'static str,

        /// The underlying error.
        #[source]
        err: tokio::task::JoinError,
    },

    /// Writing to the console stream failed.
    #[error("error writing workflow command to the console")]
    ConsoleWrite(#[source] std::io::Error),

    /// The handle passed in doesn't identify a remote resource.
    #[error("check run `{name}` was never created remotely")]
    MissingCheckRunId {
        /// The name of the check run.
        name: String,
    },
}

/// An error that occurred while appending a summary to the shared destination file.
#[derive(Debug, Error)]
#[error("failed to append run summary to `{path}` after {attempts} attempt(s)")]
pub struct SummaryWriteError {
    path: Utf8PathBuf,
    attempts: u32,
    #[source]
    err: std::io::Error,
}

impl SummaryWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, attempts: u32, err: std::io::Error) -> Self {
        Self {
            path: path.into(),
            attempts,
            err,
        }
    }

    /// Returns the destination path that could not be written.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// Returns the number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// An error that stopped one pipeline operation.
///
/// None of these fail the run as a whole: they are logged and the pipeline continues.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The gate could not be acquired within the configured timeout.
    #[error("{operation}: waited more than {timeout:?} for the annotation gate")]
    GateTimeout {
        /// The operation that was waiting.
        operation: &'static str,

        /// The configured timeout.
        timeout: Duration,
    },

    /// Initialization did not finish within the configured timeout.
    #[error("{operation}: run initialization did not finish within {timeout:?}")]
    InitializationTimeout {
        /// The operation that was waiting.
        operation: &'static str,

        /// The configured timeout.
        timeout: Duration,
    },

    /// Initialization finished unsuccessfully.
    #[error("{operation}: run initialization failed, no annotations can be written")]
    InitializationFailed {
        /// The operation that was waiting.
        operation: &'static str,
    },

    /// The run was already started.
    #[error("{operation}: the run was already started, ignoring")]
    AlreadyStarted {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A result identity was reported more than once.
    #[error("result `{id}` was reported more than once, keeping the latest")]
    DuplicateResult {
        /// The repeated identity.
        id: ResultId,
    },

    /// The run was in a state that doesn't allow this operation.
    #[error("{operation}: unexpected run state `{state}`")]
    UnexpectedState {
        /// The operation that was attempted.
        operation: &'static str,

        /// The state the run was in.
        state: RunState,
    },

    /// The annotation resource could not be opened.
    #[error("failed to open annotation resource `{title}`")]
    Open {
        /// The title of the resource.
        title: String,

        /// The underlying error.
        #[source]
        err: SinkError,
    },
}

/// Displays an error along with every error in its `source()` chain.
///
/// The top-level error is printed first, followed by each cause on its own indented line.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut cause = self.error.source();
        while let Some(error) = cause {
            write!(f, "\n  caused by:\n  - {error}")?;
            cause = error.source();
        }

        Ok(())
    }
}
