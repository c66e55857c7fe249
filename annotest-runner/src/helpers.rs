// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for annotest-runner.

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "annotation" if `count` is 1, otherwise "annotations".
    pub fn annotations_str(count: usize) -> &'static str {
        if count == 1 {
            "annotation"
        } else {
            "annotations"
        }
    }

    /// Returns "task" if `count` is 1, otherwise "tasks".
    pub fn tasks_str(count: usize) -> &'static str {
        if count == 1 { "task" } else { "tasks" }
    }
}

/// Parses a configuration flag.
///
/// `1` and `true` (in any case) are true. Everything else, including `0`, `false` and garbage, is
/// false.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Replaces `\` path separators with `/`.
pub fn convert_to_forward_slash(path: &str) -> String {
    path.replace('\\', "/")
}
