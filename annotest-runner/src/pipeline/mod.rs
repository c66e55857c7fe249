// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run pipeline: turns host events into annotations and a run summary.
//!
//! The host calls [`RunPipeline::on_run_start`] once, [`RunPipeline::on_result`] once per test
//! (possibly from many threads at once), and [`RunPipeline::on_run_complete`] once at the end.
//! None of these return errors: every failure is logged and the pipeline carries on, so that a
//! broken annotation never fails the test run itself.
//!
//! # Ordering
//!
//! * Opening the annotation resource happens in a background task started by `on_run_start`.
//!   Annotation tasks wait for it to finish before doing anything else.
//! * Every call into the [`AnnotationSink`] is made while holding the *gate*, a mutex acquired
//!   with a timeout. The gate also guards writes to the run state.
//! * Each failing result gets a background task, registered before it starts running.
//!   `on_run_complete` waits for every registered task (the *barrier*) before summarizing.

mod annotations;
mod state;

pub use state::RunState;

use self::{
    annotations::build_annotations,
    state::{AtomicRunState, InitStatus},
};
use crate::{
    config::PipelineConfig,
    errors::{DisplayErrorChain, PipelineError},
    events::{ResultId, RunCriteria, RunStatistics, TestOutcome, TestResult},
    helpers::plural,
    sink::{AnnotationSink, CheckRunHandle, Conclusion},
    stack_trace::StackTraceNormalizer,
    summary::{RunSummary, SummaryGenerator, SummaryWriter},
};
use dashmap::DashMap;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::{
    runtime::Handle,
    sync::{MutexGuard, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error};

/// What [`RunPipeline::on_run_complete`] produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunCompletion {
    /// The conclusion the annotation resource was closed with.
    pub conclusion: Conclusion,

    /// The rendered run summary.
    pub summary: String,
}

/// Drives one test run.
///
/// Cloning a `RunPipeline` produces another handle to the same run.
#[derive(Debug)]
pub struct RunPipeline<S> {
    inner: Arc<Inner<S>>,
    runtime: Handle,
}

impl<S> Clone for RunPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<S: AnnotationSink> RunPipeline<S> {
    /// Creates a new pipeline.
    ///
    /// Background work is spawned onto `runtime`, so the event methods can be called from threads
    /// that aren't part of it.
    pub fn new(config: PipelineConfig, sink: S, runtime: Handle) -> Self {
        let normalizer = config.workspace.as_deref().map(StackTraceNormalizer::new);
        let generator = SummaryGenerator::from_config(&config);
        let writer = SummaryWriter::new(config.summary_path.clone());
        let (init_tx, _) = watch::channel(InitStatus::Pending);

        Self {
            inner: Arc::new(Inner {
                sink,
                config,
                normalizer,
                generator,
                writer,
                state: AtomicRunState::new(),
                gate: tokio::sync::Mutex::new(Gate { handle: None }),
                start_requested: AtomicBool::new(false),
                init_tx,
                init_task: Mutex::new(None),
                registry: DashMap::new(),
                displaced: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(0),
            }),
            runtime,
        }
    }

    /// Returns the current run state.
    pub fn state(&self) -> RunState {
        self.inner.state.load()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Returns the sink.
    pub fn sink(&self) -> &S {
        &self.inner.sink
    }

    /// Returns the number of results registered so far.
    pub fn result_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the registered result with the given identity.
    pub fn result(&self, id: &ResultId) -> Option<Arc<TestResult>> {
        self.inner
            .registry
            .get(id)
            .map(|pending| pending.result.clone())
    }

    /// Handles the start of a run.
    ///
    /// Opens the annotation resource in the background and returns immediately. A second call is
    /// logged and ignored.
    pub fn on_run_start(&self, criteria: &RunCriteria) {
        if self.inner.start_requested.swap(true, Ordering::AcqRel) {
            report(&PipelineError::AlreadyStarted {
                operation: "run start",
            });
            return;
        }

        let title = criteria.run_title(&self.inner.config.run_name);
        debug!("starting run `{title}`");

        let inner = self.inner.clone();
        let task = self
            .runtime
            .spawn(async move { inner.initialize(&title).await });
        *self
            .inner
            .init_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Handles one test result.
    ///
    /// Failing results are annotated in the background. Every result is registered, and included
    /// in the summary if it failed.
    pub fn on_result(&self, result: TestResult) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let result = Arc::new(result);
        let id = result.id.clone();

        if !result.outcome.is_failure() {
            self.inner.register(
                id,
                PendingResult {
                    seq,
                    result,
                    task: None,
                },
            );
            return;
        }

        // The task waits until it has been registered, so the barrier can't miss it.
        let (registered_tx, registered_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let task_result = result.clone();
        let task = self.runtime.spawn(async move {
            if registered_rx.await.is_ok() {
                inner.annotate(&task_result).await;
            }
        });

        self.inner.register(
            id,
            PendingResult {
                seq,
                result,
                task: Some(task),
            },
        );
        // The receiver only goes away if the task was cancelled.
        let _ = registered_tx.send(());
    }

    /// Handles the end of a run.
    ///
    /// Waits for every annotation task, writes the summary and closes the annotation resource.
    /// Returns the conclusion and the rendered summary.
    pub async fn on_run_complete(&self, statistics: &RunStatistics) -> RunCompletion {
        let inner = &self.inner;
        inner.wait_for_init_task().await;

        let state = inner.state.load();
        if state != RunState::Started {
            // Carry on: the summary is still useful.
            report(&PipelineError::UnexpectedState {
                operation: "run complete",
                state,
            });
        }

        inner.wait_for_pending().await;

        let failures = inner.failures();
        let summary = RunSummary::new(&inner.config.run_name, statistics, failures)
            .with_labels(inner.config.suite.clone(), inner.config.framework.clone());
        let text = inner.generator.generate(&summary);
        if let Err(err) = inner.writer.append(&text).await {
            report(&err);
        }

        let conclusion = conclusion(statistics, &summary);
        if let Err(err) = inner.finish(conclusion).await {
            report(&err);
        }

        RunCompletion {
            conclusion,
            summary: text,
        }
    }

    /// Ends a run whose events stopped arriving before it completed.
    ///
    /// Waits for initialization and every annotation task, then closes the annotation resource
    /// with [`Conclusion::Cancelled`]. No summary is written. Does nothing if the run already
    /// finished.
    pub async fn abandon(&self) {
        let inner = &self.inner;
        inner.wait_for_init_task().await;
        if inner.state.load() == RunState::Finished {
            return;
        }

        inner.wait_for_pending().await;
        if let Err(err) = inner.finish(Conclusion::Cancelled).await {
            report(&err);
        }
    }
}

#[derive(Debug)]
struct Inner<S> {
    sink: S,
    config: PipelineConfig,
    normalizer: Option<StackTraceNormalizer>,
    generator: SummaryGenerator,
    writer: SummaryWriter,
    state: AtomicRunState,
    gate: tokio::sync::Mutex<Gate>,
    start_requested: AtomicBool,
    init_tx: watch::Sender<InitStatus>,
    init_task: Mutex<Option<JoinHandle<()>>>,
    registry: DashMap<ResultId, PendingResult>,
    // Tasks for results whose identity was reported again. Still awaited at the barrier.
    displaced: Mutex<Vec<(ResultId, JoinHandle<()>)>>,
    next_seq: AtomicU64,
}

/// State that may only be touched while holding the gate.
#[derive(Debug)]
struct Gate {
    handle: Option<CheckRunHandle>,
}

#[derive(Debug)]
struct PendingResult {
    seq: u64,
    result: Arc<TestResult>,
    // None for results that don't need annotating.
    task: Option<JoinHandle<()>>,
}

impl<S: AnnotationSink> Inner<S> {
    async fn initialize(&self, title: &str) {
        let status = match self.open(title).await {
            Ok(()) => InitStatus::Ready,
            Err(err) => {
                report(&err);
                InitStatus::Failed
            }
        };
        self.init_tx.send_replace(status);
    }

    async fn open(&self, title: &str) -> Result<(), PipelineError> {
        let mut gate = self.acquire_gate("run start").await?;

        let state = self.state.load();
        if state != RunState::NotRunning {
            return Err(PipelineError::UnexpectedState {
                operation: "run start",
                state,
            });
        }

        let handle = self
            .sink
            .open(title)
            .await
            .map_err(|err| PipelineError::Open {
                title: title.to_owned(),
                err,
            })?;
        gate.handle = Some(handle);
        self.state.advance(RunState::Started);
        debug!("opened annotation resource `{title}`");
        Ok(())
    }

    async fn annotate(&self, result: &TestResult) {
        match self.try_annotate(result).await {
            Ok(count) => debug!(
                id = %result.id,
                "posted {count} {} for `{}`",
                plural::annotations_str(count),
                result.display_name,
            ),
            Err(err) => {
                error!(
                    id = %result.id,
                    "failed to annotate `{}`: {}",
                    result.display_name,
                    DisplayErrorChain::new(&err),
                );
            }
        }
    }

    async fn try_annotate(&self, result: &TestResult) -> Result<usize, PipelineError> {
        const OPERATION: &str = "annotate result";

        self.wait_for_initialization(OPERATION).await?;
        let annotations = build_annotations(result, self.normalizer.as_ref());

        let mut gate = self.acquire_gate(OPERATION).await?;
        let state = self.state.load();
        let Some(mut handle) = gate.handle.clone().filter(|_| state == RunState::Started) else {
            return Err(PipelineError::UnexpectedState {
                operation: OPERATION,
                state,
            });
        };

        let mut posted = 0;
        for annotation in &annotations {
            match self.sink.emit(&handle, annotation).await {
                Ok(updated) => {
                    handle = updated;
                    posted += 1;
                }
                Err(err) => error!(
                    id = %result.id,
                    "failed to post annotation for {}: {}",
                    annotation.file.as_deref().unwrap_or("(no file)"),
                    DisplayErrorChain::new(&err),
                ),
            }
        }
        gate.handle = Some(handle);

        Ok(posted)
    }

    async fn wait_for_initialization(&self, operation: &'static str) -> Result<(), PipelineError> {
        if self.state.load() == RunState::Started {
            return Ok(());
        }

        let mut init_rx = self.init_tx.subscribe();
        let timeout = self.config.gate_timeout;
        let status = tokio::time::timeout(timeout, async {
            init_rx
                .wait_for(|status| *status != InitStatus::Pending)
                .await
                .map(|status| *status)
        })
        .await;

        match status {
            Ok(Ok(InitStatus::Ready)) => Ok(()),
            Ok(Ok(_) | Err(_)) => Err(PipelineError::InitializationFailed { operation }),
            Err(_) => Err(PipelineError::InitializationTimeout { operation, timeout }),
        }
    }

    async fn acquire_gate(
        &self,
        operation: &'static str,
    ) -> Result<MutexGuard<'_, Gate>, PipelineError> {
        let timeout = self.config.gate_timeout;
        tokio::time::timeout(timeout, self.gate.lock())
            .await
            .map_err(|_| PipelineError::GateTimeout { operation, timeout })
    }

    fn register(&self, id: ResultId, pending: PendingResult) {
        let Some(previous) = self.registry.insert(id.clone(), pending) else {
            return;
        };

        report(&PipelineError::DuplicateResult { id: id.clone() });
        if let Some(task) = previous.task {
            self.displaced
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id, task));
        }
    }

    /// Waits for initialization, for at most the gate timeout.
    ///
    /// On timeout the initialization task is cancelled, which releases the gate if the open call
    /// was holding it.
    async fn wait_for_init_task(&self) {
        let init_task = self
            .init_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut task) = init_task else {
            return;
        };

        let timeout = self.config.gate_timeout;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("run initialization task did not complete: {err}"),
            Err(_) => {
                report(&PipelineError::InitializationTimeout {
                    operation: "run complete",
                    timeout,
                });
                task.abort();
                if let Err(err) = task.await
                    && !err.is_cancelled()
                {
                    error!("run initialization task did not complete: {err}");
                }
                self.init_tx.send_replace(InitStatus::Failed);
            }
        }
    }

    /// The barrier: waits for every registered annotation task.
    async fn wait_for_pending(&self) {
        let mut tasks: Vec<_> = self
            .registry
            .iter_mut()
            .filter_map(|mut entry| {
                let task = entry.task.take()?;
                Some((entry.key().clone(), task))
            })
            .collect();
        tasks.extend(
            self.displaced
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..),
        );

        debug!(
            "waiting for {} annotation {}",
            tasks.len(),
            plural::tasks_str(tasks.len()),
        );
        for (id, task) in tasks {
            if let Err(err) = task.await {
                error!(%id, "annotation task did not complete: {err}");
            }
        }
    }

    /// Failing results in the order they were reported.
    fn failures(&self) -> Vec<Arc<TestResult>> {
        let mut failures: Vec<_> = self
            .registry
            .iter()
            .filter(|entry| entry.result.outcome.is_failure())
            .map(|entry| (entry.seq, entry.result.clone()))
            .collect();
        failures.sort_unstable_by_key(|(seq, _)| *seq);
        failures.into_iter().map(|(_, result)| result).collect()
    }

    /// Closes the annotation resource and moves the run to `Finished`.
    async fn finish(&self, conclusion: Conclusion) -> Result<(), PipelineError> {
        let mut gate = self.acquire_gate("run complete").await?;

        match gate.handle.take() {
            Some(handle) => {
                if let Err(err) = self.sink.close(handle, conclusion).await {
                    error!(
                        "failed to close annotation resource: {}",
                        DisplayErrorChain::new(&err),
                    );
                }
            }
            None => debug!("no annotation resource is open, nothing to close"),
        }

        self.state.advance(RunState::Finished);
        debug!(%conclusion, "run finished");
        Ok(())
    }
}

fn conclusion(statistics: &RunStatistics, summary: &RunSummary) -> Conclusion {
    if statistics.aborted || statistics.cancelled {
        Conclusion::Cancelled
    } else if statistics.count(TestOutcome::Failed) > 0
        || statistics.count(TestOutcome::NotFound) > 0
        || !summary.failures.is_empty()
    {
        Conclusion::Failure
    } else {
        Conclusion::Success
    }
}

fn report(err: &(dyn std::error::Error + 'static)) {
    error!("{}", DisplayErrorChain::new(err));
}
