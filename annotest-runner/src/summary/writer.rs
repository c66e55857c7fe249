// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::SummaryWriteError;
use camino::{Utf8Path, Utf8PathBuf};
use rand::{RngExt, distr::OpenClosed01};
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    sync::Arc,
    time::Duration,
};
use tracing::debug;

/// Appends rendered summaries to a file shared with other writers.
///
/// Several runs in one build may append to the same destination at once. Each append takes an
/// exclusive lock on the file, and retries with a jittered delay while another writer holds it.
#[derive(Clone, Debug)]
pub struct SummaryWriter {
    path: Utf8PathBuf,
    max_attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
}

impl SummaryWriter {
    /// The default number of attempts made before giving up.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    /// The default lower bound on the delay between attempts.
    pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);

    /// The default upper bound on the delay between attempts.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(1000);

    /// Creates a writer appending to `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            min_delay: Self::DEFAULT_MIN_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    /// Overrides the retry budget.
    ///
    /// At least one attempt is always made. If `max_delay` is less than `min_delay`, the delay is
    /// always `min_delay`.
    pub fn with_retries(
        mut self,
        max_attempts: u32,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    /// Returns the destination path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends `text` to the destination, creating it if necessary.
    ///
    /// Returns an error if the file stays locked by another writer for the whole retry budget, or
    /// if any other I/O error occurs.
    pub async fn append(&self, text: &str) -> Result<(), SummaryWriteError> {
        let text: Arc<str> = Arc::from(text);
        let mut attempt = 0;
        loop {
            attempt += 1;

            let path = self.path.clone();
            let text = text.clone();
            let result = tokio::task::spawn_blocking(move || append_locked(&path, &text))
                .await
                .unwrap_or_else(|err| Err(io::Error::other(err)));

            match result {
                Ok(()) => {
                    debug!(%attempt, "appended run summary to {}", self.path);
                    return Ok(());
                }
                Err(err) if is_sharing_violation(&err) && attempt < self.max_attempts => {
                    let delay = self.next_delay();
                    debug!(
                        %attempt,
                        "{} is locked by another writer, retrying in {delay:?}",
                        self.path,
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(SummaryWriteError::new(self.path.clone(), attempt, err));
                }
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter: f64 = rand::rng().sample(OpenClosed01);
        self.min_delay + (self.max_delay - self.min_delay).mul_f64(jitter)
    }
}

fn append_locked(path: &Utf8Path, text: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.try_lock()?;
    let result = write_all(&mut file, text);
    let unlocked = file.unlock();
    result.and(unlocked)
}

fn write_all(file: &mut File, text: &str) -> io::Result<()> {
    file.write_all(text.as_bytes())?;
    file.flush()
}

fn is_sharing_violation(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION.
    const WINDOWS_SHARING_ERRORS: [i32; 2] = [32, 33];

    err.kind() == io::ErrorKind::WouldBlock
        || (cfg!(windows)
            && err
                .raw_os_error()
                .is_some_and(|code| WINDOWS_SHARING_ERRORS.contains(&code)))
}
