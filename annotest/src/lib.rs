// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Annotate failing tests in CI from a stream of test-run events.
//!
//! The binary reads newline-delimited JSON events from a test host and drives an
//! [`annotest_runner::pipeline::RunPipeline`]. See the `annotest-runner` crate for the library.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, OutputContext, StderrStyles};
