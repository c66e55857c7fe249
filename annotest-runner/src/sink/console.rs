// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Annotation, AnnotationSink, CheckRunHandle, Conclusion};
use crate::errors::SinkError;
use debug_ignore::DebugIgnore;
use std::{
    fmt,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};
use tracing::warn;

/// Writes annotations as workflow commands, one per line.
///
/// The CI runner scans the job's standard output for lines of the form
/// `::command key=value,key=value::message` and turns them into annotations and log groups.
#[derive(Debug)]
pub struct ConsoleSink {
    out: DebugIgnore<Mutex<Box<dyn Write + Send>>>,
}

impl ConsoleSink {
    /// Creates a sink writing to standard output.
    pub fn stdout(echo: bool) -> Self {
        Self::new(io::stdout(), echo)
    }

    /// Creates a sink writing to `out`.
    ///
    /// Writes an `echo` command first, so the runner shows (or hides) the commands that follow.
    pub fn new(out: impl Write + Send + 'static, echo: bool) -> Self {
        let sink = Self {
            out: DebugIgnore(Mutex::new(Box::new(out))),
        };
        let state = if echo { "on" } else { "off" };
        if let Err(error) = sink.write_command(&WorkflowCommand::new("echo", state)) {
            warn!("failed to write echo command: {error}");
        }
        sink
    }

    fn write_command(&self, command: &WorkflowCommand<'_>) -> Result<(), SinkError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{command}")
            .and_then(|()| out.flush())
            .map_err(SinkError::ConsoleWrite)
    }
}

impl AnnotationSink for ConsoleSink {
    async fn open(&self, title: &str) -> Result<CheckRunHandle, SinkError> {
        self.write_command(&WorkflowCommand::new("group", title))?;
        Ok(CheckRunHandle::local(title))
    }

    async fn emit(
        &self,
        handle: &CheckRunHandle,
        annotation: &Annotation,
    ) -> Result<CheckRunHandle, SinkError> {
        self.write_command(&WorkflowCommand::annotation(annotation))?;
        Ok(handle.clone())
    }

    async fn close(&self, _handle: CheckRunHandle, _conclusion: Conclusion) -> Result<(), SinkError> {
        self.write_command(&WorkflowCommand::new("endgroup", ""))
    }
}

/// A single workflow command.
#[derive(Clone, Debug, PartialEq, Eq)]
struct WorkflowCommand<'a> {
    name: &'a str,
    parameters: Vec<(&'static str, String)>,
    message: &'a str,
}

impl<'a> WorkflowCommand<'a> {
    fn new(name: &'a str, message: &'a str) -> Self {
        Self {
            name,
            parameters: Vec::new(),
            message,
        }
    }

    fn annotation(annotation: &'a Annotation) -> Self {
        let mut command = Self::new(annotation.severity.command_name(), &annotation.message);
        command.parameter("file", annotation.file.as_deref());
        command.parameter("line", annotation.start_line);
        command.parameter("endLine", annotation.end_line);
        command.parameter("col", annotation.column);
        command.parameter("endColumn", annotation.end_column);
        command.parameter("title", annotation.title.as_deref());
        command
    }

    fn parameter(&mut self, key: &'static str, value: Option<impl ToString>) {
        if let Some(value) = value {
            self.parameters.push((key, value.to_string()));
        }
    }
}

impl fmt::Display for WorkflowCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "::{}", self.name)?;
        for (idx, (key, value)) in self.parameters.iter().enumerate() {
            let separator = if idx == 0 { ' ' } else { ',' };
            write!(f, "{separator}{key}={}", escape_property(value))?;
        }
        write!(f, "::{}", escape_data(self.message))
    }
}

fn escape_data(data: &str) -> String {
    data.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}
