// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    output::{OutputContext, OutputOpts, clap_styles},
};
use annotest_runner::{
    config::PipelineConfig,
    events::HostEvent,
    pipeline::{RunCompletion, RunPipeline},
    sink::{AnnotationSink, AnyAnnotationSink},
};
use camino::Utf8PathBuf;
use clap::Parser;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader},
};
use tracing::{debug, info, warn};

/// Annotate failing tests in CI from a stream of test-run events.
///
/// Reads newline-delimited JSON events (`run-start`, `result` and `run-complete`) and posts an
/// annotation on the source line of every failing test. When the run completes, a summary is
/// appended to the step summary file.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct AnnotestApp {
    /// Read events from this file instead of standard input
    #[arg(long, value_name = "FILE")]
    input: Option<Utf8PathBuf>,

    /// Set a parameter, overriding the environment variable of the same name
    #[arg(
        short = 'p',
        long = "param",
        value_name = "KEY=VALUE",
        value_parser = parse_param
    )]
    params: Vec<(String, String)>,

    #[command(flatten)]
    output: OutputOpts,
}

impl AnnotestApp {
    /// Initializes logging and returns the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self) -> Result<i32, ExpectedError> {
        let params: BTreeMap<_, _> = self.params.into_iter().collect();
        let config = PipelineConfig::from_env(&params)?;

        let (name, input): (String, Box<dyn BufRead>) = match &self.input {
            Some(path) => {
                let file = File::open(path).map_err(|err| ExpectedError::InputOpen {
                    path: path.clone(),
                    err,
                })?;
                (format!("`{path}`"), Box::new(BufReader::new(file)))
            }
            None => ("<stdin>".to_owned(), Box::new(io::stdin().lock())),
        };

        if !config.is_github_actions() {
            warn!(
                "not a GitHub Actions run (`CI` and `GITHUB_ACTIONS` must both be true), \
                 skipping annotations"
            );
            let count = drain_events(input, &name)?;
            debug!("read {count} events without annotating");
            return Ok(0);
        }

        let sink = AnyAnnotationSink::from_config(&config);
        drive(config, sink, input, &name)?;
        Ok(0)
    }
}

fn parse_param(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, found `{input}`")),
    }
}

/// Runs one pipeline over every event in `input`.
///
/// Returns the completion of the run, or `None` if the stream ended without a run-complete event.
pub(crate) fn drive<S: AnnotationSink>(
    config: PipelineConfig,
    sink: S,
    input: impl BufRead,
    name: &str,
) -> Result<Option<RunCompletion>, ExpectedError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("annotest-worker")
        .build()
        .map_err(|err| ExpectedError::RuntimeBuild { err })?;
    let pipeline = RunPipeline::new(config, sink, runtime.handle().clone());

    let mut completion = None;
    for event in Events::new(input, name) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                // Close the annotation resource so it isn't left in progress.
                runtime.block_on(pipeline.abandon());
                return Err(err);
            }
        };
        match event {
            HostEvent::RunStart(criteria) => pipeline.on_run_start(&criteria),
            HostEvent::Result(result) => pipeline.on_result(result),
            HostEvent::RunComplete(statistics) => {
                let done = runtime.block_on(pipeline.on_run_complete(&statistics));
                info!(
                    "run finished with conclusion {}, summary written to `{}`",
                    done.conclusion,
                    pipeline.config().summary_path,
                );
                completion = Some(done);
            }
        }
    }

    if completion.is_none() {
        warn!("event stream ended without a run-complete event, no summary was written");
    }
    Ok(completion)
}

fn drain_events(input: impl BufRead, name: &str) -> Result<usize, ExpectedError> {
    Events::new(input, name).try_fold(0, |count, event| event.map(|_| count + 1))
}

/// Iterates over the events in a newline-delimited JSON stream, skipping blank lines.
struct Events<'a, R> {
    lines: io::Lines<R>,
    name: &'a str,
    line_number: usize,
}

impl<'a, R: BufRead> Events<'a, R> {
    fn new(input: R, name: &'a str) -> Self {
        Self {
            lines: input.lines(),
            name,
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for Events<'_, R> {
    type Item = Result<HostEvent, ExpectedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(ExpectedError::InputRead {
                        input: self.name.to_owned(),
                        err,
                    }));
                }
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&line).map_err(|err| {
                ExpectedError::EventParse {
                    input: self.name.to_owned(),
                    line_number: self.line_number,
                    err,
                }
            }));
        }
    }
}
