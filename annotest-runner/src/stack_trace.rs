// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of managed-runtime stack traces into file and line addressable frames.
//!
//! Stack traces are line-oriented. Each frame line looks like:
//!
//! ```text
//!    at Namespace.Type.Method(ParamType param, Other`1 other) in /path/to/File.cs:line 42
//! ```
//!
//! The ` in <file>:line <N>` suffix is optional: frames from runtime and library code usually
//! don't have one. Any line that doesn't start with `at ` (the exception message, blank lines,
//! `--- End of stack trace ---` separators) is skipped.
//!
//! Parsing is stateless: [`parse`] returns an iterator that borrows the input and can be cloned
//! to restart from the same point.

use crate::helpers::convert_to_forward_slash;
use std::{fmt, iter::FusedIterator, str::Lines};

static FRAME_MARKER: &str = "at ";
static FILE_MARKER: &str = " in ";
static LINE_MARKER: &str = ":line ";

/// A single frame parsed out of a stack trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// The frame text following the `at ` marker.
    pub frame: String,

    /// The fully-qualified type name.
    pub type_name: String,

    /// The method name, including any continuation marker such as `+MoveNext()`.
    pub method: String,

    /// The raw parameter list, without the enclosing parentheses.
    pub parameter_list: String,

    /// The parameter list split into individual parameters.
    pub parameters: Vec<StackFrameParameter>,

    /// The source file, if the frame has one.
    pub file: Option<String>,

    /// The raw line number text, if the frame has a source location.
    pub line: Option<String>,
}

impl StackFrame {
    /// Returns the parsed line number of this frame.
    pub fn line_number(&self) -> LineNumber<'_> {
        match self.line.as_deref() {
            None => LineNumber::Missing,
            Some(text) => match text.trim().parse() {
                Ok(line) => LineNumber::Valid(line),
                Err(_) => LineNumber::Invalid(text),
            },
        }
    }

    /// Returns the fully-qualified method name, `Type.Method`.
    ///
    /// Constructors come out as `Type..ctor`, matching how the runtime renders them.
    pub fn qualified_method(&self) -> String {
        if self.type_name.is_empty() {
            self.method.clone()
        } else {
            format!("{}.{}", self.type_name, self.method)
        }
    }
}

/// One parameter of a [`StackFrame`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrameParameter {
    /// The parameter's type.
    pub ty: String,

    /// The parameter's name. Empty if the runtime didn't render one.
    pub name: String,
}

/// The line number of a [`StackFrame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineNumber<'a> {
    /// The frame has no source location.
    Missing,

    /// The frame has a valid line number.
    Valid(u32),

    /// The frame has line number text that isn't an integer.
    Invalid(&'a str),
}

impl LineNumber<'_> {
    /// Returns the line number if it is valid.
    pub fn value(self) -> Option<u32> {
        match self {
            LineNumber::Valid(line) => Some(line),
            LineNumber::Missing | LineNumber::Invalid(_) => None,
        }
    }
}

impl fmt::Display for LineNumber<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineNumber::Missing => f.write_str("(none)"),
            LineNumber::Valid(line) => write!(f, "{line}"),
            LineNumber::Invalid(text) => write!(f, "`{text}` (invalid)"),
        }
    }
}

/// Parses a stack trace into frames.
pub fn parse(stack_trace: &str) -> StackFrames<'_> {
    StackFrames {
        lines: stack_trace.lines(),
    }
}

/// An iterator over the frames of a stack trace, returned by [`parse`].
#[derive(Clone, Debug)]
pub struct StackFrames<'a> {
    lines: Lines<'a>,
}

impl Iterator for StackFrames<'_> {
    type Item = StackFrame;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.by_ref().find_map(parse_frame_line)
    }
}

impl FusedIterator for StackFrames<'_> {}

/// Rewrites frame file paths relative to a workspace root.
///
/// Files under the root become root-relative with `/` separators. Files elsewhere are left
/// untouched so that frames in dependencies keep their absolute paths.
#[derive(Clone, Debug)]
pub struct StackTraceNormalizer {
    // Forward slashes, no trailing separator.
    workspace_root: String,
    case_insensitive: bool,
}

impl StackTraceNormalizer {
    /// Creates a normalizer for the given workspace root.
    ///
    /// Prefix matching is case-insensitive on Windows and case-sensitive elsewhere.
    pub fn new(workspace_root: &str) -> Self {
        Self {
            workspace_root: convert_to_forward_slash(workspace_root)
                .trim_end_matches('/')
                .to_owned(),
            case_insensitive: cfg!(windows),
        }
    }

    /// Overrides whether the workspace prefix is matched case-insensitively.
    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Returns the workspace root, with forward slashes.
    pub fn workspace_root(&self) -> &str {
        &self.workspace_root
    }

    /// Parses a stack trace, rewriting in-workspace files relative to the workspace root.
    pub fn parse_and_normalize<'a>(
        &'a self,
        stack_trace: &'a str,
    ) -> impl Iterator<Item = StackFrame> + Clone + 'a {
        parse(stack_trace).map(move |frame| self.normalize(frame))
    }

    /// Normalizes a single frame.
    pub fn normalize(&self, mut frame: StackFrame) -> StackFrame {
        if let Some(relative) = frame.file.as_deref().and_then(|file| self.relative_path(file)) {
            frame.file = Some(relative);
        }
        frame
    }

    /// Returns `file` relative to the workspace root, or `None` if it lies outside the root.
    pub fn relative_path(&self, file: &str) -> Option<String> {
        let root = self.workspace_root.as_str();
        if root.is_empty() || file.trim().is_empty() {
            return None;
        }

        let file = convert_to_forward_slash(file);
        let prefix = file.get(..root.len())?;
        let matches = if self.case_insensitive {
            prefix.eq_ignore_ascii_case(root)
        } else {
            prefix == root
        };
        if !matches {
            return None;
        }

        // The prefix has to end on a path component: `/src` is not a prefix of `/srcs/a.cs`.
        let rest = &file[root.len()..];
        if !rest.starts_with('/') {
            return None;
        }
        let rest = rest.trim_matches('/');
        (!rest.is_empty()).then(|| rest.to_owned())
    }
}

fn parse_frame_line(line: &str) -> Option<StackFrame> {
    let frame = line.trim_start().strip_prefix(FRAME_MARKER)?;
    let call = split_call(frame)?;
    let (continuation, location) = split_location(call.rest);
    let (type_name, method) = split_qualified_name(call.qualified);

    let mut method = method.to_owned();
    method.push_str(continuation.trim());

    let (file, line) = match location {
        Some((file, line)) => (Some(file.to_owned()), Some(line.to_owned())),
        None => (None, None),
    };

    Some(StackFrame {
        frame: frame.trim_end().to_owned(),
        type_name: type_name.to_owned(),
        method,
        parameter_list: call.parameter_list.to_owned(),
        parameters: split_parameters(call.parameter_list),
        file,
        line,
    })
}

/// Splits the text after a parameter list into the continuation and the `(file, N)` location of
/// a trailing ` in file:line N`.
///
/// The file runs from the first ` in ` to the last `:line `, so it may contain either marker.
fn split_location(rest: &str) -> (&str, Option<(&str, &str)>) {
    let Some(in_idx) = rest.find(FILE_MARKER) else {
        return (rest, None);
    };
    let location = &rest[in_idx + FILE_MARKER.len()..];
    let Some(line_idx) = location.rfind(LINE_MARKER) else {
        return (rest, None);
    };

    let file = &location[..line_idx];
    if file.trim().is_empty() {
        return (rest, None);
    }
    let line = location[line_idx + LINE_MARKER.len()..].trim();
    (&rest[..in_idx], Some((file, line)))
}

struct SplitCall<'a> {
    qualified: &'a str,
    parameter_list: &'a str,
    // Everything after the parameter list.
    rest: &'a str,
}

/// Splits `Type.Method(params)rest` into its parts.
///
/// Returns `None` if the text doesn't look like a call: no parameter list, an unbalanced parameter
/// list, or whitespace in the qualified name outside of generic brackets.
fn split_call(call: &str) -> Option<SplitCall<'_>> {
    let mut depth = 0usize;
    let mut open = None;
    for (idx, ch) in call.char_indices() {
        match ch {
            '<' | '[' => depth += 1,
            '>' | ']' => depth = depth.saturating_sub(1),
            '(' if depth == 0 => {
                open = Some(idx);
                break;
            }
            ch if ch.is_whitespace() && depth == 0 => return None,
            _ => {}
        }
    }
    let open = open?;

    let qualified = &call[..open];
    if qualified.is_empty() {
        return None;
    }

    let mut depth = 0usize;
    let mut close = None;
    for (idx, ch) in call[open..].char_indices() {
        match ch {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    close = Some(open + idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;

    Some(SplitCall {
        qualified,
        parameter_list: &call[open + 1..close],
        rest: &call[close + 1..],
    })
}

/// Splits `Namespace.Type.Method` at the last top-level dot.
fn split_qualified_name(qualified: &str) -> (&str, &str) {
    let mut depth = 0usize;
    let mut last_dot = None;
    for (idx, ch) in qualified.char_indices() {
        match ch {
            '<' | '[' => depth += 1,
            '>' | ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => last_dot = Some(idx),
            _ => {}
        }
    }

    match last_dot {
        None => ("", qualified),
        // Constructors render as `Type..ctor`, keep the leading dot on the method.
        Some(idx) if idx > 0 && qualified[..idx].ends_with('.') => {
            (&qualified[..idx - 1], &qualified[idx..])
        }
        Some(idx) => (&qualified[..idx], &qualified[idx + 1..]),
    }
}

/// Splits a parameter list on top-level commas.
///
/// Commas nested in generic brackets or parentheses don't split.
fn split_parameters(parameter_list: &str) -> Vec<StackFrameParameter> {
    if parameter_list.trim().is_empty() {
        return Vec::new();
    }

    let mut parameters = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in parameter_list.char_indices() {
        match ch {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parameters.push(split_parameter(&parameter_list[start..idx]));
                start = idx + 1;
            }
            _ => {}
        }
    }
    parameters.push(split_parameter(&parameter_list[start..]));
    parameters
}

fn split_parameter(parameter: &str) -> StackFrameParameter {
    let parameter = parameter.trim();

    let mut depth = 0usize;
    let mut last_space = None;
    for (idx, ch) in parameter.char_indices() {
        match ch {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => depth = depth.saturating_sub(1),
            ch if ch.is_whitespace() && depth == 0 => last_space = Some(idx),
            _ => {}
        }
    }

    match last_space {
        Some(idx) => StackFrameParameter {
            ty: parameter[..idx].trim_end().to_owned(),
            name: parameter[idx..].trim_start().to_owned(),
        },
        None => StackFrameParameter {
            ty: parameter.to_owned(),
            name: String::new(),
        },
    }
}
