// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [annotest](https://crates.io/crates/annotest): turns the event stream of
//! a test run into CI annotations on failing source lines, and a run summary.
//!
//! The entry point is [`pipeline::RunPipeline`]. It receives run-start, result and run-complete
//! events from a test host, posts annotations through an [`sink::AnnotationSink`], and appends a
//! rendered [`summary::RunSummary`] to a shared file once the run completes.

pub mod config;
pub mod errors;
pub mod events;
mod helpers;
pub mod pipeline;
pub mod sink;
pub mod stack_trace;
pub mod summary;
