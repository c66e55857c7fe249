// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use annotest_runner::errors::ConfigError;
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

/// Process exit codes used by annotest.
///
/// Failing tests never change the exit code: annotest exits with 0 as long as it could read the
/// whole event stream.
pub enum AnnotestExitCode {}

impl AnnotestExitCode {
    /// The configuration was invalid or the runtime could not start.
    ///
    /// Malformed command-line arguments are reported by clap, which exits with code 2.
    pub const SETUP_ERROR: i32 = 96;

    /// The event stream could not be read or parsed.
    pub const INPUT_ERROR: i32 = 97;
}

// The #[error()] strings are placeholders: errors are printed with display_to_stderr.

/// An error that annotest knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config error")]
    Config {
        #[from]
        err: ConfigError,
    },
    #[error("async runtime build error")]
    RuntimeBuild {
        #[source]
        err: std::io::Error,
    },
    #[error("input open error")]
    InputOpen {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("input read error")]
    InputRead {
        input: String,
        #[source]
        err: std::io::Error,
    },
    #[error("event parse error")]
    EventParse {
        input: String,
        line_number: usize,
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::RuntimeBuild { .. } => AnnotestExitCode::SETUP_ERROR,
            Self::InputOpen { .. } | Self::InputRead { .. } | Self::EventParse { .. } => {
                AnnotestExitCode::INPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::Config { err } => {
                error!("invalid configuration");
                Some(err as &dyn Error)
            }
            Self::RuntimeBuild { err } => {
                error!("failed to start the async runtime");
                Some(err as &dyn Error)
            }
            Self::InputOpen { path, err } => {
                error!("failed to open event input `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::InputRead { input, err } => {
                error!("failed to read events from {}", input.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::EventParse {
                input,
                line_number,
                err,
            } => {
                error!(
                    "failed to parse event at {}",
                    format!("{input}:{line_number}").style(styles.bold)
                );
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
