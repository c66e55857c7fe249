// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use annotest_runner::{
    config::PipelineConfig,
    errors::SinkError,
    events::{ResultId, RunStatistics, TestOutcome, TestResult},
    pipeline::RunPipeline,
    sink::{Annotation, AnnotationSink, CheckRunHandle, CheckRunStatus, Conclusion},
};
use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use std::{
    collections::BTreeMap,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::runtime::Handle;

pub(crate) const WORKSPACE: &str = "/home/runner/work/shop";

/// Something the stub sink was asked to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SinkCall {
    Open(String),
    Emit(Annotation),
    Close(Conclusion),
}

/// An annotation sink that records calls and tracks how many emits overlap.
///
/// Failed calls are recorded too.
#[derive(Debug, Default)]
pub(crate) struct StubSink {
    open_delay: Duration,
    emit_delay: Duration,
    fail_open: bool,
    // 1-based index of the emit call that fails.
    failing_emit: Option<usize>,
    emit_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<SinkCall>>,
}

impl StubSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub(crate) fn with_emit_delay(mut self, delay: Duration) -> Self {
        self.emit_delay = delay;
        self
    }

    pub(crate) fn with_open_error(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn with_emit_error(mut self, nth: usize) -> Self {
        self.failing_emit = Some(nth);
        self
    }

    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn emitted(&self) -> Vec<Annotation> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Emit(annotation) => Some(annotation),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn opened(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SinkCall::Open(_)))
            .count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl AnnotationSink for StubSink {
    async fn open(&self, title: &str) -> Result<CheckRunHandle, SinkError> {
        tokio::time::sleep(self.open_delay).await;
        self.record(SinkCall::Open(title.to_owned()));
        if self.fail_open {
            return Err(SinkError::Authentication { status: 401 });
        }
        Ok(CheckRunHandle {
            id: Some(1),
            name: title.to_owned(),
            status: CheckRunStatus::Queued,
        })
    }

    async fn emit(
        &self,
        handle: &CheckRunHandle,
        annotation: &Annotation,
    ) -> Result<CheckRunHandle, SinkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.emit_delay).await;
        self.record(SinkCall::Emit(annotation.clone()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let nth = self.emit_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_emit == Some(nth) {
            return Err(SinkError::HttpStatus {
                operation: "update check run",
                status: 422,
            });
        }
        Ok(CheckRunHandle {
            status: CheckRunStatus::InProgress,
            ..handle.clone()
        })
    }

    async fn close(&self, _handle: CheckRunHandle, conclusion: Conclusion) -> Result<(), SinkError> {
        self.record(SinkCall::Close(conclusion));
        Ok(())
    }
}

/// A temporary summary destination plus the configuration pointing at it.
pub(crate) struct TestEnv {
    // Held so the directory lives as long as the test.
    _dir: Utf8TempDir,
    pub(crate) summary_path: Utf8PathBuf,
    pub(crate) config: PipelineConfig,
}

impl TestEnv {
    pub(crate) fn new(gate_timeout: Duration) -> Self {
        let dir = Utf8TempDir::new().unwrap();
        let summary_path = dir.path().join("summary.md");
        let params = BTreeMap::from([
            ("name".to_owned(), "unit".to_owned()),
            ("GITHUB_WORKSPACE".to_owned(), WORKSPACE.to_owned()),
            (
                "GITHUB_STEP_SUMMARY".to_owned(),
                summary_path.as_str().to_owned(),
            ),
        ]);
        let mut config = PipelineConfig::from_sources(&params, |_| None).unwrap();
        config.gate_timeout = gate_timeout;

        Self {
            _dir: dir,
            summary_path,
            config,
        }
    }

    pub(crate) fn pipeline<S: AnnotationSink>(&self, sink: S) -> RunPipeline<S> {
        RunPipeline::new(self.config.clone(), sink, Handle::current())
    }
}

pub(crate) fn passed(id: &str) -> TestResult {
    TestResult {
        id: ResultId::new(id),
        outcome: TestOutcome::Passed,
        display_name: format!("Shop.Tests.{id}"),
        error_message: None,
        error_stack_trace: None,
        messages: Vec::new(),
    }
}

/// A failing result with one frame inside the workspace.
pub(crate) fn failed(id: &str) -> TestResult {
    failed_with_trace(
        id,
        &format!("   at Shop.Tests.CartTests.{id}() in {WORKSPACE}/tests/CartTests.cs:line 10"),
    )
}

pub(crate) fn failed_with_trace(id: &str, stack_trace: &str) -> TestResult {
    TestResult {
        id: ResultId::new(id),
        outcome: TestOutcome::Failed,
        display_name: format!("Shop.Tests.{id}"),
        error_message: Some("Assert.Equal() Failure".to_owned()),
        error_stack_trace: Some(stack_trace.to_owned()),
        messages: Vec::new(),
    }
}

pub(crate) fn statistics(passed: u64, failed: u64) -> RunStatistics {
    RunStatistics {
        stats: BTreeMap::from([
            (TestOutcome::Passed, passed),
            (TestOutcome::Failed, failed),
            (TestOutcome::Skipped, 0),
        ]),
        executed: passed + failed,
        elapsed: Duration::from_millis(1500),
        aborted: false,
        cancelled: false,
    }
}

/// An in-memory writer shared between clones, for console output and `tracing` logs.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Returns a subscriber logging into this buffer.
    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let logs = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .without_time()
            .with_writer(move || logs.clone())
            .finish()
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Returns the lines logged at `level`, for example `"ERROR"`.
    pub(crate) fn lines_at(&self, level: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(level))
            .map(str::to_owned)
            .collect()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
