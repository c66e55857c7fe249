// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// The lifecycle state of a run.
///
/// States only move forward: `NotRunning` to `Started` to `Finished`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunState {
    /// The run hasn't started, or initialization hasn't completed.
    NotRunning,

    /// The annotation resource is open.
    Started,

    /// The run completed and the annotation resource was closed.
    Finished,
}

impl RunState {
    fn as_u8(self) -> u8 {
        match self {
            RunState::NotRunning => 0,
            RunState::Started => 1,
            RunState::Finished => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::NotRunning,
            1 => RunState::Started,
            _ => RunState::Finished,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotRunning => f.write_str("not running"),
            RunState::Started => f.write_str("started"),
            RunState::Finished => f.write_str("finished"),
        }
    }
}

/// A [`RunState`] that can be read without holding the gate.
///
/// Writers must hold the gate.
#[derive(Debug)]
pub(super) struct AtomicRunState(AtomicU8);

impl AtomicRunState {
    pub(super) fn new() -> Self {
        Self(AtomicU8::new(RunState::NotRunning.as_u8()))
    }

    pub(super) fn load(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves the state forward to `to`, returning the previous state.
    ///
    /// A request to move backwards leaves the state unchanged.
    pub(super) fn advance(&self, to: RunState) -> RunState {
        RunState::from_u8(self.0.fetch_max(to.as_u8(), Ordering::AcqRel))
    }
}

/// The outcome of run initialization, broadcast to annotation tasks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum InitStatus {
    Pending,
    Ready,
    Failed,
}
