// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning tests into commands, and running those commands as OS processes.
//!
//! A [`CommandBuilder`] maps a test plus a [`CommandContext`] to a [`TestCommand`]. Commands are run
//! on pool workers: each one is spawned in its own process group so that the whole tree can be
//! terminated on timeout or abort.

use crate::{
    errors::JobError, pool::WorkerContext, result::ProcessOutput, test_instance::TestInstance,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, time::Duration};

mod imp;

pub(crate) use imp::{ChildProcess, TerminateSignal};

/// A concrete command for one test run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCommand {
    program: Utf8PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
    grace_period: Duration,
}

impl TestCommand {
    /// The default time a process gets to exit after `SIGTERM` before it is killed.
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

    /// Creates a new command.
    pub fn new(
        program: impl Into<Utf8PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            timeout,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
        }
    }

    /// Adds environment overrides.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the grace period between `SIGTERM` and `SIGKILL` on timeout.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns the program.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Returns the arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the environment overrides.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Returns the time after which the process is terminated.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the command to completion, capturing its output.
    ///
    /// The process is spawned in its own process group and registered with the worker, so an
    /// aborted pool can terminate it. If it runs past its timeout it is sent `SIGTERM`, and
    /// `SIGKILL` after the grace period.
    pub fn run(&self, cx: &WorkerContext) -> Result<ProcessOutput, JobError> {
        imp::run(self, cx)
    }
}

impl fmt::Display for TestCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words =
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))
    }
}

/// Everything a [`CommandBuilder`] needs besides the test itself.
#[derive(Clone, Debug)]
pub struct CommandContext {
    /// The directory containing the binary under test.
    pub binary_dir: Utf8PathBuf,

    /// The file name of the binary under test.
    pub binary_name: String,

    /// The directory that suites live under.
    pub test_root: Utf8PathBuf,

    /// Flags passed to every test, before the test's own flags.
    pub global_flags: Vec<String>,

    /// Environment overrides for every test.
    pub env: Vec<(String, String)>,

    /// The base per-test timeout.
    pub timeout: Duration,

    /// Whether the binary was built in a slow configuration (e.g. debug or sanitizers).
    pub slow_configuration: bool,

    /// The time a timed-out process gets between `SIGTERM` and `SIGKILL`.
    pub grace_period: Duration,
}

impl CommandContext {
    /// Timeout multiplier for slow configurations.
    pub const SLOW_CONFIGURATION_FACTOR: u32 = 2;

    /// Timeout multiplier for tests marked `SLOW`.
    pub const SLOW_TEST_FACTOR: u32 = 4;

    /// Creates a context for running `binary_dir/binary_name`.
    pub fn new(
        binary_dir: impl Into<Utf8PathBuf>,
        binary_name: impl Into<String>,
        test_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            binary_name: binary_name.into(),
            test_root: test_root.into(),
            global_flags: Vec::new(),
            env: Vec::new(),
            timeout: Duration::from_secs(60),
            slow_configuration: false,
            grace_period: TestCommand::DEFAULT_GRACE_PERIOD,
        }
    }

    /// Returns the effective timeout for `test`.
    pub fn timeout_for(&self, test: &TestInstance) -> Duration {
        let mut timeout = self.timeout;
        if self.slow_configuration {
            timeout *= Self::SLOW_CONFIGURATION_FACTOR;
        }
        if test.attributes().slow {
            timeout *= Self::SLOW_TEST_FACTOR;
        }
        timeout
    }
}

/// Builds the command for a test.
pub trait CommandBuilder: fmt::Debug + Send + Sync {
    /// Returns the command that runs `test`.
    fn build(&self, test: &TestInstance, cx: &CommandContext) -> TestCommand;
}

/// Runs `<binary> <global flags> <test flags> [--random-seed=N] <test files...>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCommandBuilder;

impl CommandBuilder for DefaultCommandBuilder {
    fn build(&self, test: &TestInstance, cx: &CommandContext) -> TestCommand {
        let mut args: Vec<String> = cx.global_flags.clone();
        args.extend(test.flags().iter().cloned());
        if let Some(seed) = test.random_seed() {
            args.push(format!("--random-seed={seed}"));
        }
        let suite_dir = cx.test_root.join(test.suite());
        args.extend(test.paths().into_iter().map(|path| suite_dir.join(path).into_string()));

        TestCommand::new(cx.binary_dir.join(&cx.binary_name), args, cx.timeout_for(test))
            .with_env(cx.env.iter().cloned())
            .with_grace_period(cx.grace_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_instance::TestAttributes;
    use pretty_assertions::assert_eq;

    fn context() -> CommandContext {
        let mut cx = CommandContext::new("/out/x64.release", "d8", "/src/test");
        cx.global_flags = vec!["--test".to_owned()];
        cx.timeout = Duration::from_secs(10);
        cx
    }

    #[test]
    fn default_command_line() {
        let test = TestInstance::new("mjsunit", "array-sort.js")
            .with_flags(["--allow-natives-syntax"])
            .with_random_seed(-42);
        let command = DefaultCommandBuilder.build(&test, &context());

        assert_eq!(command.program().as_str(), "/out/x64.release/d8");
        assert_eq!(
            command.args(),
            [
                "--test",
                "--allow-natives-syntax",
                "--random-seed=-42",
                "/src/test/mjsunit/array-sort.js"
            ]
        );
    }

    #[test]
    fn display_quotes_arguments() {
        let command = TestCommand::new("/out/d8", ["--test", "has space.js"], Duration::ZERO);
        assert_eq!(command.to_string(), "/out/d8 --test 'has space.js'");
    }

    #[test]
    fn timeouts_scale_for_slow_tests() {
        let mut cx = context();
        let slow = TestInstance::new("mjsunit", "big.js").with_attributes(TestAttributes {
            slow: true,
            ..TestAttributes::default()
        });
        let fast = TestInstance::new("mjsunit", "small.js");

        assert_eq!(cx.timeout_for(&fast), Duration::from_secs(10));
        assert_eq!(cx.timeout_for(&slow), Duration::from_secs(40));

        cx.slow_configuration = true;
        assert_eq!(cx.timeout_for(&fast), Duration::from_secs(20));
        assert_eq!(cx.timeout_for(&slow), Duration::from_secs(80));
    }
}
