// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events delivered by the test host.
//!
//! A run consists of exactly one [`RunCriteria`] (run start), any number of [`TestResult`]s, and
//! exactly one [`RunStatistics`] (run complete). [`HostEvent`] wraps all three for hosts that
//! stream events as newline-delimited JSON.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};

/// One event emitted by the test host.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostEvent {
    /// The run started.
    RunStart(RunCriteria),

    /// A single test produced a result.
    Result(TestResult),

    /// The run finished.
    RunComplete(RunStatistics),
}

/// The filter criteria the run was started with.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunCriteria {
    /// The test filter expression, if any.
    #[serde(default)]
    pub filter: Option<String>,

    /// The test sources (binaries or assemblies) being run.
    #[serde(default)]
    pub sources: Vec<Utf8PathBuf>,
}

impl RunCriteria {
    /// Returns the title used for the annotation resource opened for this run.
    pub fn run_title(&self, run_name: &str) -> String {
        match self.filter.as_deref() {
            Some(filter) if !filter.trim().is_empty() => {
                format!("test run --filter:{filter} / {run_name}")
            }
            _ => format!("test run / {run_name}"),
        }
    }
}

/// The identity of a single test result within a run.
///
/// Identities are expected to be unique per run.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ResultId(String);

impl ResultId {
    /// Creates a new result identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The outcome of a single test.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcome {
    /// No outcome was recorded.
    None,

    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Skipped,

    /// The test was requested but could not be found.
    NotFound,
}

impl TestOutcome {
    /// Returns true if this outcome should be annotated.
    pub fn is_failure(self) -> bool {
        matches!(self, TestOutcome::Failed | TestOutcome::NotFound)
    }

    /// Returns a string representation of this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::None => "none",
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Skipped => "skipped",
            TestOutcome::NotFound => "not-found",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a single test.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TestResult {
    /// The identity of this result.
    pub id: ResultId,

    /// The outcome.
    pub outcome: TestOutcome,

    /// The name shown to users.
    pub display_name: String,

    /// The error message, for failing tests.
    #[serde(default)]
    pub error_message: Option<String>,

    /// The rendered stack trace, for failing tests.
    #[serde(default)]
    pub error_stack_trace: Option<String>,

    /// Output captured while the test ran.
    #[serde(default)]
    pub messages: Vec<ResultMessage>,
}

impl TestResult {
    /// Returns the stack trace text, or an empty string if there is none.
    pub fn stack_trace(&self) -> &str {
        self.error_stack_trace.as_deref().unwrap_or_default()
    }
}

/// A message captured while a test ran.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResultMessage {
    /// Where the message came from.
    pub category: MessageCategory,

    /// The text of the message.
    pub text: String,
}

/// The source of a [`ResultMessage`].
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageCategory {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,

    /// Debug traces.
    Debug,

    /// Additional information attached by the test framework.
    Info,

    /// Any other category.
    #[serde(other)]
    Other,
}

impl MessageCategory {
    /// Returns the prefix written before messages of this category, if any.
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            MessageCategory::Stderr => Some("[stderr]: "),
            MessageCategory::Debug => Some("[dbg]: "),
            MessageCategory::Info => Some("[info]: "),
            MessageCategory::Stdout | MessageCategory::Other => None,
        }
    }
}

/// Aggregate statistics delivered when the run completes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunStatistics {
    /// Number of tests per outcome.
    #[serde(default)]
    pub stats: BTreeMap<TestOutcome, u64>,

    /// Number of tests executed.
    pub executed: u64,

    /// Time spent running tests.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// True if the run was aborted.
    #[serde(default)]
    pub aborted: bool,

    /// True if the run was cancelled.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunStatistics {
    /// Returns the number of tests with the given outcome.
    pub fn count(&self, outcome: TestOutcome) -> u64 {
        self.stats.get(&outcome).copied().unwrap_or(0)
    }
}
