// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, WrapErr};
use pipetest_runner::{
    test_command::{CommandBuilder, CommandContext, TestCommand},
    test_instance::TestInstance,
};
use std::sync::Once;

pub(crate) const SUITE: &str = "shell";

/// Installs a tracing subscriber that writes through the test harness. Safe to call from every
/// test.
pub(crate) fn test_init() {
    static INIT_LOGGING: Once = Once::new();
    INIT_LOGGING.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Runs `/bin/sh <suite dir>/<path> <flags...>`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ShellCommandBuilder;

impl CommandBuilder for ShellCommandBuilder {
    fn build(&self, test: &TestInstance, cx: &CommandContext) -> TestCommand {
        let script = cx.test_root.join(test.suite()).join(test.path());
        let args = std::iter::once(script.into_string()).chain(test.flags().iter().cloned());
        TestCommand::new("/bin/sh", args, cx.timeout_for(test)).with_grace_period(cx.grace_period)
    }
}

/// A temporary test root holding shell scripts in [`SUITE`].
pub(crate) struct ScriptDir {
    dir: Utf8TempDir,
}

impl ScriptDir {
    pub(crate) fn new() -> Result<Self> {
        let dir = Utf8TempDir::new().wrap_err("failed to create temp dir")?;
        std::fs::create_dir(dir.path().join(SUITE)).wrap_err("failed to create suite dir")?;
        Ok(Self { dir })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Writes a script and returns the root test that runs it.
    pub(crate) fn script(&self, name: &str, contents: &str) -> Result<TestInstance> {
        std::fs::write(self.dir.path().join(SUITE).join(name), contents)
            .wrap_err_with(|| format!("failed to write {name}"))?;
        Ok(TestInstance::new(SUITE, name))
    }

    pub(crate) fn path(&self, name: &str) -> Utf8PathBuf {
        self.dir.path().join(name)
    }

    pub(crate) fn context(&self) -> CommandContext {
        CommandContext::new("/bin", "sh", self.root())
    }
}
