// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{FormattedElapsed, RunSummary};
use crate::{
    config::{PermalinkBase, PipelineConfig},
    events::TestResult,
    stack_trace::{StackFrame, StackTraceNormalizer},
};
use swrite::{SWrite, swrite, swriteln};
use tracing::warn;

/// Renders a [`RunSummary`] as a collapsible block.
///
/// Rendering is pure apart from one warning when failures can't be linked to their source.
#[derive(Clone, Debug, Default)]
pub struct SummaryGenerator {
    normalizer: Option<StackTraceNormalizer>,
    permalink: Option<PermalinkBase>,
}

impl SummaryGenerator {
    /// Creates a generator.
    ///
    /// Frames under `workspace` are shown relative to it. Frames are linked to their source only
    /// if `permalink` is set.
    pub fn new(workspace: Option<&str>, permalink: Option<PermalinkBase>) -> Self {
        let normalizer = permalink
            .as_ref()
            .map(|base| base.workspace.as_str())
            .or(workspace)
            .map(StackTraceNormalizer::new);
        Self {
            normalizer,
            permalink,
        }
    }

    /// Creates a generator from pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.workspace.as_deref(), config.permalink_base())
    }

    /// Renders `summary`.
    pub fn generate(&self, summary: &RunSummary) -> String {
        let mut out = String::with_capacity(1024);

        let icon = if summary.failed > 0 {
            "📕"
        } else if summary.skipped > 0 {
            "📙"
        } else {
            "📗"
        };
        swrite!(out, "<details><summary>{icon} <b>{}", summary.run_name);
        if let Some(suite) = non_blank(summary.suite.as_deref()) {
            swrite!(out, " / {suite}");
        }
        out.push_str("</b>");
        if let Some(framework) = non_blank(summary.framework.as_deref()) {
            swrite!(out, " ({framework})");
        }
        swriteln!(out, "</summary>");
        out.push('\n');

        swriteln!(
            out,
            "passed:{} failed:{} skipped:{} total:{}",
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.total,
        );
        out.push('\n');

        out.push_str("<table>");
        for header in [
            "🟢&nbsp;&nbsp;Passed",
            "🔴&nbsp;&nbsp;Failed",
            "🟡&nbsp;&nbsp;Skipped",
            "∑&nbsp;&nbsp;Total",
            "🕙&nbsp;&nbsp;Elapsed",
        ] {
            swrite!(out, "<th width=\"99999\">{header}</th>");
        }
        out.push_str("<tr>");
        for count in [summary.passed, summary.failed, summary.skipped] {
            swrite!(out, "<td align=\"center\">{}</td>", DisplayCount(count));
        }
        swrite!(out, "<td align=\"center\">{}</td>", summary.total);
        swrite!(
            out,
            "<td align=\"center\">{}</td>",
            FormattedElapsed(summary.elapsed)
        );
        swriteln!(out, "</tr></table>");
        out.push('\n');

        if !summary.failures.is_empty() && self.permalink.is_none() {
            warn!(
                "server URL, repository, workspace or commit SHA is unset, \
                 failures in the summary won't link to source"
            );
        }
        for result in &summary.failures {
            self.write_failure(&mut out, result);
        }

        swriteln!(out, "</details>");
        out.push('\n');
        out
    }

    fn write_failure(&self, out: &mut String, result: &TestResult) {
        let frames = self.frames(result.stack_trace());

        let heading_link = frames.iter().find_map(|frame| self.frame_link(frame));
        match heading_link {
            Some(link) => swriteln!(out, "Fail: [**{}**]({link})", result.display_name),
            None => swriteln!(out, "Fail: **{}**", result.display_name),
        }

        swriteln!(out, "```yml");
        if let Some(message) = &result.error_message {
            swriteln!(out, "{}", message.trim_end());
        }
        if !result.stack_trace().trim().is_empty() {
            swriteln!(out, "{}", result.stack_trace().trim_end());
        }
        swriteln!(out, "```");

        for frame in &frames {
            swrite!(out, "- `{}`", frame.qualified_method());
            match (&frame.file, self.frame_link(frame)) {
                (Some(file), Some(link)) => {
                    swrite!(out, " at [{file}:{}]({link})", frame.line_number());
                }
                (Some(file), None) => match frame.line_number().value() {
                    Some(line) => swrite!(out, " at `{file}:{line}`"),
                    None => swrite!(out, " at `{file}`"),
                },
                (None, _) => {}
            }
            out.push('\n');
        }
        out.push('\n');
    }

    fn frames(&self, stack_trace: &str) -> Vec<StackFrame> {
        match &self.normalizer {
            Some(normalizer) => normalizer.parse_and_normalize(stack_trace).collect(),
            None => crate::stack_trace::parse(stack_trace).collect(),
        }
    }

    /// Returns a link to the frame's source, for frames that were made workspace-relative.
    fn frame_link(&self, frame: &StackFrame) -> Option<String> {
        let base = self.permalink.as_ref()?;
        let file = frame.file.as_deref()?;
        let line = frame.line_number().value()?;
        // Files that are still absolute lie outside the workspace.
        if is_absolute(file) {
            return None;
        }
        Some(base.link(file, line))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn is_absolute(file: &str) -> bool {
    let bytes = file.as_bytes();
    file.starts_with('/')
        || file.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

struct DisplayCount(u64);

impl std::fmt::Display for DisplayCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 > 0 {
            write!(f, "{}", self.0)
        } else {
            f.write_str("—")
        }
    }
}
