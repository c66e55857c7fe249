// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    events::TestResult,
    sink::{Annotation, Severity},
    stack_trace::{self, LineNumber, StackTraceNormalizer},
};
use swrite::{SWrite, swriteln};
use tracing::warn;

/// Builds the annotations posted for one failing result.
///
/// Every frame whose file lies under the workspace gets an annotation on its line. A result with
/// no such frame gets a single annotation without a location, so the failure is still reported.
pub(super) fn build_annotations(
    result: &TestResult,
    normalizer: Option<&StackTraceNormalizer>,
) -> Vec<Annotation> {
    let message = annotation_message(result);
    let annotation = Annotation::new(Severity::Error, message).with_title(&result.display_name);

    let mut annotations = Vec::new();
    if let Some(normalizer) = normalizer {
        for frame in stack_trace::parse(result.stack_trace()) {
            let Some(file) = frame.file.as_deref().and_then(|f| normalizer.relative_path(f)) else {
                continue;
            };
            let line = match frame.line_number() {
                LineNumber::Valid(line) => Some(line),
                LineNumber::Missing => None,
                LineNumber::Invalid(text) => {
                    warn!(
                        id = %result.id,
                        "can't parse line number `{text}` in frame `{}`, annotating the whole file",
                        frame.frame,
                    );
                    None
                }
            };
            annotations.push(annotation.clone().with_location(file, line));
        }
    }

    if annotations.is_empty() {
        annotations.push(annotation);
    }
    annotations
}

/// The message body: the error, the stack trace and any captured output.
pub(super) fn annotation_message(result: &TestResult) -> String {
    let mut out = String::with_capacity(1024);

    if let Some(message) = result.error_message.as_deref().filter(|m| !m.is_empty()) {
        swriteln!(out, "{message}");
    }

    let stack_trace = result.stack_trace();
    if !stack_trace.is_empty() {
        swriteln!(out, "[Stack Trace]");
        swriteln!(out, "{stack_trace}");
    }

    if !result.messages.is_empty() {
        swriteln!(out, "[Output]");
        for message in &result.messages {
            if let Some(prefix) = message.category.prefix() {
                out.push_str(prefix);
            }
            swriteln!(out, "{}", message.text);
        }
    }

    out
}
