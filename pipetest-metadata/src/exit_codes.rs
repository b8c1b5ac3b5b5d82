// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for pipetest runs.
///
/// When several of these apply to one run, the most severe one wins. Severity does not follow the
/// numeric order: see `ExitKind` in `pipetest-runner`.
pub enum PipetestExitCode {}

impl PipetestExitCode {
    /// All tests matched their expected outcomes.
    pub const OK: i32 = 0;

    /// The runner itself failed, for example because the execution pool lost all of its workers.
    pub const INTERNAL_ERROR: i32 = 1;

    /// One or more tests produced unexpected output.
    pub const TESTS_FAILED: i32 = 2;

    /// No tests were run.
    pub const NO_TESTS: i32 = 3;

    /// The run was interrupted (SIGINT) before it finished.
    pub const INTERRUPTED: i32 = 4;

    /// The run was terminated (SIGTERM) before it finished.
    pub const TERMINATED: i32 = 5;
}
