// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Results that flow backward through the pipeline.
//!
//! Every test a stage receives is answered by exactly one backward message carrying an
//! `Option<TestResult>`. `None` is the "no result" answer: it is what a producer forwards when it
//! has nothing to aggregate, and what the execution stage hands back when nobody upstream needs
//! pass/fail information.
//!
//! Results cross the pool boundary, and captured output is expensive to carry around. Stages
//! therefore negotiate a [`ResultRequirement`] during setup, and the execution stage uses it to
//! [`reduce`](ResultRequirement::reduce) results before handing them back.

use crate::{test_command::TestCommand, test_instance::TestInstance};
use chrono::{DateTime, Local};
use pipetest_metadata::{Outcome, RunStatus};
use std::{sync::Arc, time::Duration};

/// Raw output of one process execution.
#[derive(Clone, Debug)]
pub struct ProcessOutput {
    /// The exit code, if the process exited normally.
    pub exit_code: Option<i32>,

    /// The signal that terminated the process, on Unix.
    pub signal: Option<i32>,

    /// Whether the process was killed for running past its timeout.
    pub timed_out: bool,

    /// Captured standard output.
    pub stdout: Option<String>,

    /// Captured standard error.
    pub stderr: Option<String>,

    /// When the process was started.
    pub start_time: DateTime<Local>,

    /// How long the process ran.
    pub duration: Duration,
}

impl ProcessOutput {
    /// Returns true if the process crashed: it was killed by a signal (or exited with a negative
    /// code) and this was not the result of a timeout.
    pub fn has_crashed(&self) -> bool {
        !self.timed_out && (self.signal.is_some() || self.exit_code.is_some_and(|code| code < 0))
    }

    /// Returns the runtime outcome this output represents.
    pub fn outcome(&self) -> Outcome {
        if self.has_crashed() {
            Outcome::Crash
        } else if self.timed_out {
            Outcome::Timeout
        } else if self.exit_code != Some(0) {
            Outcome::Fail
        } else {
            Outcome::Pass
        }
    }
}

/// The result of one concrete run.
#[derive(Clone, Debug)]
pub struct SingleResult {
    /// Whether the run produced an outcome its test did not expect.
    pub has_unexpected_output: bool,

    /// The coarse status of the run.
    pub status: RunStatus,

    /// Raw process output, if retained.
    pub output: Option<ProcessOutput>,

    /// The command that was run, if retained.
    pub command: Option<TestCommand>,

    /// Errors encountered while trying to run the test.
    pub error_details: Option<String>,
}

impl SingleResult {
    /// Returns the status of this run.
    ///
    /// `PASS` if the outcome matched expectations, otherwise `CRASH` if the process crashed, else
    /// `FAIL`.
    pub fn status(&self) -> RunStatus {
        self.status
    }
}

/// Several concrete results reported for a single forwarded test.
#[derive(Clone, Debug, Default)]
pub struct GroupedResult {
    /// The subtests and their results, in the order they finished.
    pub results: Vec<(Arc<TestInstance>, TestResult)>,
}

impl GroupedResult {
    /// Returns true if any member has unexpected output.
    pub fn has_unexpected_output(&self) -> bool {
        self.results
            .iter()
            .any(|(_, result)| result.has_unexpected_output())
    }

    /// Returns the worst status among members, if any member ran.
    pub fn status(&self) -> Option<RunStatus> {
        self.results
            .iter()
            .filter_map(|(_, result)| result.status())
            .max()
    }
}

/// The attempts made for a test that was rerun.
#[derive(Clone, Debug)]
pub struct RerunResult {
    // Invariant: non-empty, in temporal order.
    attempts: Vec<SingleResult>,
}

impl RerunResult {
    /// Creates a new rerun result. Returns `None` if `attempts` is empty.
    pub fn new(attempts: Vec<SingleResult>) -> Option<Self> {
        (!attempts.is_empty()).then_some(Self { attempts })
    }

    /// Returns every attempt, in the order they ran.
    pub fn attempts(&self) -> &[SingleResult] {
        &self.attempts
    }

    /// Returns the last attempt, which determines the outcome.
    pub fn last(&self) -> &SingleResult {
        self.attempts
            .last()
            .expect("attempts is non-empty by construction")
    }

    /// Returns true if the last attempt had unexpected output.
    pub fn has_unexpected_output(&self) -> bool {
        self.last().has_unexpected_output
    }

    /// Returns the status of the last attempt.
    pub fn status(&self) -> RunStatus {
        self.last().status
    }

    /// Returns true if an earlier attempt failed but the last one passed.
    pub fn is_flaky(&self) -> bool {
        self.attempts.len() > 1 && !self.last().has_unexpected_output
    }
}

/// The outcome of running, or not running, a test.
#[derive(Clone, Debug)]
pub enum TestResult {
    /// The test was dropped before it ran.
    Skipped,

    /// One concrete run.
    Single(SingleResult),

    /// Several concrete runs reported for one test.
    Grouped(GroupedResult),

    /// A run plus its reruns.
    Rerun(RerunResult),
}

impl TestResult {
    /// Returns true if the result contains an unexpected outcome.
    pub fn has_unexpected_output(&self) -> bool {
        match self {
            TestResult::Skipped => false,
            TestResult::Single(single) => single.has_unexpected_output,
            TestResult::Grouped(grouped) => grouped.has_unexpected_output(),
            TestResult::Rerun(rerun) => rerun.has_unexpected_output(),
        }
    }

    /// Returns the status, or `None` if nothing ran.
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            TestResult::Skipped => None,
            TestResult::Single(single) => Some(single.status),
            TestResult::Grouped(grouped) => grouped.status(),
            TestResult::Rerun(rerun) => Some(rerun.status()),
        }
    }
}

/// How much of a result a stage needs, ordered from least to most detail.
///
/// During setup each stage passes `max(incoming, own)` to its successor, so a stage can widen the
/// requirement but never narrow it.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResultRequirement {
    /// Nobody needs the result at all.
    #[default]
    DropResult,

    /// Only the pass/fail information is needed.
    DropOutput,

    /// Output is needed for unexpected results only.
    DropPassOutput,

    /// Like `DropPassOutput`, but stderr is also kept for expected results.
    DropPassStdout,
}

impl ResultRequirement {
    /// Reduces a result to the detail this requirement asks for.
    pub fn reduce(self, mut result: SingleResult) -> Option<SingleResult> {
        match self {
            ResultRequirement::DropResult => return None,
            ResultRequirement::DropOutput => {
                result.output = None;
                result.command = None;
            }
            ResultRequirement::DropPassOutput => {
                if !result.has_unexpected_output {
                    if let Some(output) = &mut result.output {
                        output.stdout = None;
                        output.stderr = None;
                    }
                }
            }
            ResultRequirement::DropPassStdout => {
                if !result.has_unexpected_output {
                    if let Some(output) = &mut result.output {
                        output.stdout = None;
                    }
                }
            }
        }
        Some(result)
    }
}


#[cfg(test)]
mod tests {
    use super::{test_helpers::*, *};
    use test_case::test_case;

    #[test_case(Some(0), None, false, Outcome::Pass ; "clean exit")]
    #[test_case(Some(1), None, false, Outcome::Fail ; "failing exit")]
    #[test_case(None, Some(11), false, Outcome::Crash ; "segfault")]
    #[test_case(Some(-6), None, false, Outcome::Crash ; "negative exit code")]
    #[test_case(None, Some(15), true, Outcome::Timeout ; "killed after timeout")]
    fn process_output_outcome(
        exit_code: Option<i32>,
        signal: Option<i32>,
        timed_out: bool,
        expected: Outcome,
    ) {
        let output = ProcessOutput {
            exit_code,
            signal,
            timed_out,
            ..process_output(0, "", "")
        };
        assert_eq!(output.outcome(), expected);
    }

    #[test]
    fn reduce_levels() {
        assert!(ResultRequirement::DropResult.reduce(single(false)).is_none());

        let reduced = ResultRequirement::DropOutput
            .reduce(single(true))
            .expect("kept");
        assert!(reduced.output.is_none());
        assert!(reduced.has_unexpected_output);

        let pass = ResultRequirement::DropPassOutput
            .reduce(single(false))
            .expect("kept");
        let output = pass.output.expect("output kept");
        assert_eq!(output.stdout, None);
        assert_eq!(output.stderr, None);

        let fail = ResultRequirement::DropPassOutput
            .reduce(single(true))
            .expect("kept");
        assert_eq!(fail.output.expect("output kept").stdout.as_deref(), Some("out"));

        let pass = ResultRequirement::DropPassStdout
            .reduce(single(false))
            .expect("kept");
        let output = pass.output.expect("output kept");
        assert_eq!(output.stdout, None);
        assert_eq!(output.stderr.as_deref(), Some("err"));
    }

    #[test]
    fn rerun_reflects_last_attempt() {
        assert!(RerunResult::new(Vec::new()).is_none());

        let rerun = RerunResult::new(vec![single(true), single(false)]).expect("non-empty");
        assert!(!rerun.has_unexpected_output());
        assert_eq!(rerun.status(), RunStatus::Pass);
        assert!(rerun.is_flaky());
        assert_eq!(rerun.attempts().len(), 2);

        let rerun = RerunResult::new(vec![single(false), single(true)]).expect("non-empty");
        assert!(rerun.has_unexpected_output());
        assert!(!rerun.is_flaky());
    }
}
