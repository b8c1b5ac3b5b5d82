// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by pipetest.

use crate::stages::StatusFilterMode;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{borrow::Cow, fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse pipetest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to pipetest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurs while parsing a
/// [`PartitionerBuilder`](crate::partition::PartitionerBuilder) input.
#[derive(Clone, Debug, Error)]
pub struct PartitionerBuilderParseError {
    expected_format: Option<&'static str>,
    message: Cow<'static, str>,
}

impl PartitionerBuilderParseError {
    pub(crate) fn new(
        expected_format: Option<&'static str>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            expected_format,
            message: message.into(),
        }
    }
}

impl fmt::Display for PartitionerBuilderParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.expected_format {
            Some(format) => {
                write!(
                    f,
                    "partition must be in the format \"{}\":\n{}",
                    format, self.message
                )
            }
            None => write!(f, "{}", self.message),
        }
    }
}

/// An error that occurs while parsing a [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error("error parsing test threads: {message}")]
pub struct TestThreadsParseError {
    message: Cow<'static, str>,
}

impl TestThreadsParseError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An error that occurs while parsing a [`MaxFail`](crate::config::MaxFail) value.
#[derive(Clone, Debug, Error)]
#[error("error parsing max-fail: {message}")]
pub struct MaxFailParseError {
    message: Cow<'static, str>,
}

impl MaxFailParseError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned while parsing a [`StatusFilterMode`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for status filter mode: {input}\n(known values: {})",
    StatusFilterMode::variants().join(", "),
)]
pub struct StatusFilterModeParseError {
    input: String,
}

impl StatusFilterModeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while building a [`NameFilter`](crate::stages::NameFilter).
#[derive(Debug, Error)]
#[error("invalid test name pattern `{pattern}`")]
pub struct NameFilterBuildError {
    pattern: String,
    #[source]
    err: globset::Error,
}

impl NameFilterBuildError {
    pub(crate) fn new(pattern: impl Into<String>, err: globset::Error) -> Self {
        Self {
            pattern: pattern.into(),
            err,
        }
    }
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// A job failed to run on a pool worker.
///
/// This is never fatal for the pool: it is handed back to the coordinator as the job's outcome.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobError {
    /// The command could not be spawned.
    #[error("error spawning `{command}`")]
    Spawn {
        /// The command that was being spawned.
        command: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while waiting for the process to exit or collecting its output.
    #[error("error collecting output for `{command}`")]
    Collect {
        /// The command that was running.
        command: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The job panicked while running on a worker.
    #[error("job panicked: {message}")]
    Panicked {
        /// The panic message, if it could be extracted.
        message: String,
    },
}

/// An internal pool failure.
///
/// Internal errors are logged as soon as they happen. They force the pool to shut down and are
/// returned from [`Pipeline::execute`](crate::pipeline::Pipeline::execute) after shutdown.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// A worker thread could not be spawned.
    #[error("error spawning pool worker {worker_id}")]
    WorkerSpawn {
        /// The index of the worker.
        worker_id: usize,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Every worker went away while jobs were still outstanding.
    #[error("all pool workers exited with {outstanding} jobs still outstanding")]
    WorkersDisconnected {
        /// The number of jobs that will never report an outcome.
        outstanding: usize,
    },

    /// A worker thread panicked outside of a job.
    #[error("pool worker {worker_id} panicked")]
    WorkerPanicked {
        /// The index of the worker.
        worker_id: usize,
    },
}

/// An error that occurs while building a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineBuildError {
    /// A stage that drops tests deterministically was placed after a stage that generates tests.
    #[error(
        "stage `{stage}` must be placed before any stage that generates tests \
         (found after `{producer}`)"
    )]
    FilterAfterProducer {
        /// The misplaced stage.
        stage: String,

        /// The producer it was placed after.
        producer: String,
    },

    /// The initial batch size was zero.
    #[error("initial batch size must be at least 1")]
    ZeroInitialBatch,
}
