// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run summaries.
//!
//! A [`RunSummary`] is built once a run completes. [`SummaryGenerator`] renders it as a
//! collapsible HTML and Markdown block, and [`SummaryWriter`] appends the rendered block to a file
//! that may be shared with sibling runs in the same build.

mod generator;
mod writer;

pub use generator::*;
pub use writer::*;

use crate::events::{RunStatistics, TestOutcome, TestResult};
use std::{fmt, sync::Arc, time::Duration};

/// Aggregated results of one run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// The run display name.
    pub run_name: String,

    /// An optional suite label.
    pub suite: Option<String>,

    /// An optional framework label.
    pub framework: Option<String>,

    /// The number of passed tests.
    pub passed: u64,

    /// The number of failed tests.
    pub failed: u64,

    /// The number of skipped tests.
    pub skipped: u64,

    /// The number of tests executed.
    pub total: u64,

    /// Time spent running tests.
    pub elapsed: Duration,

    /// Failing results, in the order they were reported.
    pub failures: Vec<Arc<TestResult>>,
}

impl RunSummary {
    /// Builds a summary from the statistics delivered at run completion.
    pub fn new(
        run_name: impl Into<String>,
        statistics: &RunStatistics,
        failures: Vec<Arc<TestResult>>,
    ) -> Self {
        Self {
            run_name: run_name.into(),
            suite: None,
            framework: None,
            passed: statistics.count(TestOutcome::Passed),
            failed: statistics.count(TestOutcome::Failed),
            skipped: statistics.count(TestOutcome::Skipped),
            total: statistics.executed,
            elapsed: statistics.elapsed,
            failures,
        }
    }

    /// Sets the suite and framework labels.
    pub fn with_labels(mut self, suite: Option<String>, framework: Option<String>) -> Self {
        self.suite = suite;
        self.framework = framework;
        self
    }
}

/// Formats an elapsed duration in the coarsest unit that is at least 1.
///
/// Durations under a second are shown in seconds.
#[derive(Copy, Clone, Debug)]
pub struct FormattedElapsed(pub Duration);

impl fmt::Display for FormattedElapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MINUTE: f64 = 60.0;
        const HOUR: f64 = 60.0 * MINUTE;
        const DAY: f64 = 24.0 * HOUR;

        let secs = self.0.as_secs_f64();
        if secs >= DAY {
            write!(f, "{:.4} days", secs / DAY)
        } else if secs >= HOUR {
            write!(f, "{:.4} hours", secs / HOUR)
        } else if secs >= MINUTE {
            write!(f, "{:.4} minutes", secs / MINUTE)
        } else {
            write!(f, "{secs:.4} seconds")
        }
    }
}
