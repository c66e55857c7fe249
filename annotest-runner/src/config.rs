// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline configuration.
//!
//! Every setting is looked up in an explicit parameter map first (`-p key=value` on the command
//! line), then in the environment. Blank values count as absent in both sources.

use crate::{errors::ConfigError, helpers::parse_flag};
use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, warn};

/// The length of a credential accepted by the check-run API.
pub const TOKEN_LEN: usize = 40;

/// The default run name.
pub const DEFAULT_RUN_NAME: &str = "test-run-report";

/// The default check-run API base URL.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// The default summary destination, used when the environment doesn't name one.
pub const DEFAULT_SUMMARY_PATH: &str = "test-run-summary.md";

/// The default gate timeout.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration keys recognized by [`PipelineConfig::from_sources`].
pub mod keys {
    /// The check-run API credential.
    pub const TOKEN: &str = "GITHUB_TOKEN";
    /// The workspace root.
    pub const WORKSPACE: &str = "GITHUB_WORKSPACE";
    /// The commit SHA.
    pub const SHA: &str = "GITHUB_SHA";
    /// The source-control server base URL.
    pub const SERVER_URL: &str = "GITHUB_SERVER_URL";
    /// The repository slug, `owner/name`.
    pub const REPOSITORY: &str = "GITHUB_REPOSITORY";
    /// The repository owner.
    pub const REPOSITORY_OWNER: &str = "GITHUB_REPOSITORY_OWNER";
    /// The check-run API base URL.
    pub const API_URL: &str = "GITHUB_API_URL";
    /// The summary destination.
    pub const STEP_SUMMARY: &str = "GITHUB_STEP_SUMMARY";
    /// Set by CI providers.
    pub const CI: &str = "CI";
    /// Set by GitHub Actions.
    pub const GITHUB_ACTIONS: &str = "GITHUB_ACTIONS";
    /// The run display name.
    pub const NAME: &str = "name";
    /// The suite label.
    pub const SUITE: &str = "suite";
    /// The framework label.
    pub const FRAMEWORK: &str = "framework";
    /// Whether to echo debug output.
    pub const ECHO: &str = "echo";
    /// The gate timeout, in seconds.
    pub const LOCK_TIMEOUT: &str = "lock-timeout";
}

/// Configuration for one [`RunPipeline`](crate::pipeline::RunPipeline).
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// The check-run API credential.
    pub token: DebugIgnore<Option<String>>,

    /// The workspace root that in-project file paths are made relative to.
    pub workspace: Option<String>,

    /// The commit SHA the run is testing.
    pub sha: Option<String>,

    /// The source-control server base URL, for example `https://github.com`.
    pub server_url: Option<String>,

    /// The repository slug, `owner/name`.
    pub repository: Option<String>,

    /// The repository owner, if set separately from the slug.
    pub repository_owner: Option<String>,

    /// The check-run API base URL.
    pub api_url: String,

    /// Where the run summary is appended.
    pub summary_path: Utf8PathBuf,

    /// True if `CI` is set.
    pub ci: bool,

    /// True if `GITHUB_ACTIONS` is set.
    pub github_actions: bool,

    /// The run display name.
    pub run_name: String,

    /// An optional suite label shown in the summary.
    pub suite: Option<String>,

    /// An optional framework label shown in the summary.
    pub framework: Option<String>,

    /// Whether the console sink turns on echoing of workflow commands.
    pub echo: bool,

    /// How long any operation waits for the annotation gate or for initialization.
    pub gate_timeout: Duration,
}

impl PipelineConfig {
    /// Builds a configuration from an explicit parameter map and the process environment.
    pub fn from_env(params: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_sources(params, |key| std::env::var(key).ok())
    }

    /// Builds a configuration from an explicit parameter map and an environment lookup.
    ///
    /// Values in `params` take precedence over values returned by `env`.
    pub fn from_sources(
        params: &BTreeMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            params
                .get(key)
                .cloned()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| env(key).filter(|value| !value.trim().is_empty()))
        };
        let flag = |key: &str| lookup(key).is_some_and(|value| parse_flag(&value));

        let gate_timeout = match lookup(keys::LOCK_TIMEOUT) {
            Some(input) => {
                let secs: u64 = input.trim().parse().map_err(|err| {
                    ConfigError::InvalidLockTimeout {
                        key: keys::LOCK_TIMEOUT,
                        input: input.clone(),
                        err,
                    }
                })?;
                if secs == 0 {
                    return Err(ConfigError::ZeroLockTimeout {
                        key: keys::LOCK_TIMEOUT,
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_GATE_TIMEOUT,
        };

        Ok(Self {
            token: DebugIgnore(lookup(keys::TOKEN)),
            workspace: lookup(keys::WORKSPACE),
            sha: lookup(keys::SHA),
            server_url: lookup(keys::SERVER_URL),
            repository: lookup(keys::REPOSITORY),
            repository_owner: lookup(keys::REPOSITORY_OWNER),
            api_url: lookup(keys::API_URL).unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            summary_path: lookup(keys::STEP_SUMMARY)
                .map_or_else(|| Utf8PathBuf::from(DEFAULT_SUMMARY_PATH), Utf8PathBuf::from),
            ci: flag(keys::CI),
            github_actions: flag(keys::GITHUB_ACTIONS),
            run_name: lookup(keys::NAME).unwrap_or_else(|| DEFAULT_RUN_NAME.to_owned()),
            suite: lookup(keys::SUITE),
            framework: lookup(keys::FRAMEWORK),
            echo: flag(keys::ECHO),
            gate_timeout,
        })
    }

    /// Returns true if this looks like a GitHub Actions CI run.
    pub fn is_github_actions(&self) -> bool {
        self.ci && self.github_actions
    }

    /// Returns the credentials for the check-run API, if the configuration enables it.
    ///
    /// A token of the wrong length is logged as a warning. Any missing piece selects the console
    /// sink instead.
    pub fn remote_credentials(&self) -> Option<RemoteCredentials> {
        let token = self.token.as_deref()?;
        if token.len() != TOKEN_LEN {
            warn!(
                "ignoring {} of length {} (expected {TOKEN_LEN}), annotations go to the console",
                keys::TOKEN,
                token.len(),
            );
            return None;
        }

        let (Some(sha), Some(slug)) = (self.sha.as_deref(), self.repository.as_deref()) else {
            debug!(
                "{} or {} is unset, annotations go to the console",
                keys::SHA,
                keys::REPOSITORY,
            );
            return None;
        };

        let (slug_owner, repository) = match slug.split_once('/') {
            Some((owner, repository)) => (Some(owner), repository),
            None => (None, slug),
        };
        let Some(owner) = self.repository_owner.as_deref().or(slug_owner) else {
            debug!(
                "{slug} has no owner and {} is unset, annotations go to the console",
                keys::REPOSITORY_OWNER,
            );
            return None;
        };

        Some(RemoteCredentials {
            token: DebugIgnore(token.to_owned()),
            api_url: self.api_url.trim_end_matches('/').to_owned(),
            owner: owner.to_owned(),
            repository: repository.to_owned(),
            sha: sha.to_owned(),
        })
    }

    /// Returns the inputs needed to build source permalinks, if all of them are present.
    pub fn permalink_base(&self) -> Option<PermalinkBase> {
        Some(PermalinkBase {
            server_url: self.server_url.as_deref()?.trim_end_matches('/').to_owned(),
            repository: self.repository.clone()?,
            workspace: self.workspace.clone()?,
            sha: self.sha.clone()?,
        })
    }
}

/// Everything the check-run sink needs to talk to the API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCredentials {
    /// The API credential.
    pub token: DebugIgnore<String>,

    /// The API base URL, without a trailing slash.
    pub api_url: String,

    /// The repository owner.
    pub owner: String,

    /// The repository name.
    pub repository: String,

    /// The commit SHA check runs are attached to.
    pub sha: String,
}

/// The four inputs needed to link a frame to its source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermalinkBase {
    /// The server base URL, without a trailing slash.
    pub server_url: String,

    /// The repository slug.
    pub repository: String,

    /// The workspace root.
    pub workspace: String,

    /// The commit SHA.
    pub sha: String,
}

impl PermalinkBase {
    /// Returns a link to `relative_file` at `line`.
    pub fn link(&self, relative_file: &str, line: u32) -> String {
        format!(
            "{}/{}/blob/{}/{}#L{line}",
            self.server_url, self.repository, self.sha, relative_file,
        )
    }
}
