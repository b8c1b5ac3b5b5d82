// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The summary of a finished run, and the process exit code derived from it.

use crate::{
    errors::PoolError,
    result::{ResultRequirement, SingleResult, TestResult},
    signal::ShutdownEvent,
    test_instance::{ProcedureId, TestInstance},
};
use pipetest_metadata::{FailureSummary, FinalRunSummary, PipetestExitCode, RunStatus};
use std::{fmt, sync::Arc};

/// Statistics for a run, collected from the results that reach the head of the pipeline.
///
/// Every loaded test is counted at most once, no matter how many subtests it was expanded into.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    loaded: usize,
    finished: usize,
    passed: usize,
    flaky: usize,
    failed: usize,
    crashed: usize,
    skipped: usize,
    no_result: usize,
    stop_reason: Option<String>,
    internal_error: Option<Arc<PoolError>>,
    failures: Vec<FailureRecord>,
}

/// One unexpected run, with whatever evidence the pipeline retained for it.
#[derive(Clone, Debug)]
pub struct FailureRecord {
    /// The test that ran.
    pub procid: ProcedureId,

    /// The number of attempts made, including reruns.
    pub attempts: usize,

    /// The last attempt.
    pub result: SingleResult,
}

impl RunSummary {
    /// The least detail the summary needs: pass/fail for every test, and the output of unexpected
    /// runs.
    pub const REQUIREMENT: ResultRequirement = ResultRequirement::DropPassOutput;

    /// Returns the number of tests loaded into the pipeline.
    pub fn loaded(&self) -> usize {
        self.loaded
    }

    /// Returns the number of loaded tests that were answered.
    pub fn finished(&self) -> usize {
        self.finished
    }

    /// Returns the number of tests that matched expectations. Includes [`flaky`](Self::flaky).
    pub fn passed(&self) -> usize {
        self.passed
    }

    /// Returns the number of tests that only matched expectations after a rerun.
    pub fn flaky(&self) -> usize {
        self.flaky
    }

    /// Returns the number of tests with unexpected output that did not crash.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Returns the number of tests with unexpected output that crashed.
    pub fn crashed(&self) -> usize {
        self.crashed
    }

    /// Returns the number of tests dropped before running.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Returns the number of tests answered with no result.
    pub fn no_result(&self) -> usize {
        self.no_result
    }

    /// Returns why the pipeline was stopped, if it was.
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Returns the internal pool error that ended the run, if any.
    pub fn internal_error(&self) -> Option<&PoolError> {
        self.internal_error.as_deref()
    }

    /// Returns every unexpected run, in the order they were reported.
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Returns true if every loaded test finished, none had unexpected output, and the pool did
    /// not fail.
    pub fn is_success(&self) -> bool {
        self.loaded == self.finished && !self.any_failed() && self.internal_error.is_none()
    }

    /// Returns true if any test had unexpected output.
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.crashed > 0
    }

    /// Returns the exit kind for this run alone.
    pub fn exit_kind(&self) -> ExitKind {
        if self.internal_error.is_some() {
            ExitKind::InternalError
        } else if !self.is_success() {
            ExitKind::TestsFailed
        } else if self.passed + self.no_result == 0 {
            ExitKind::NoTests
        } else {
            ExitKind::Ok
        }
    }

    /// Converts this summary into its serializable form.
    pub fn to_final(&self) -> FinalRunSummary {
        FinalRunSummary {
            loaded: self.loaded,
            finished: self.finished,
            passed: self.passed,
            flaky: self.flaky,
            failed: self.failed,
            crashed: self.crashed,
            skipped: self.skipped,
            stopped: self.stop_reason.is_some(),
            internal_error: self.internal_error.as_ref().map(ToString::to_string),
            failures: self.failures.iter().map(FailureRecord::to_summary).collect(),
        }
    }

    pub(crate) fn record_loaded(&mut self) {
        self.loaded += 1;
    }

    pub(crate) fn set_stop_reason(&mut self, reason: Option<String>) {
        self.stop_reason = reason;
    }

    pub(crate) fn set_internal_error(&mut self, error: PoolError) {
        self.internal_error = Some(Arc::new(error));
    }

    pub(crate) fn record(&mut self, test: &Arc<TestInstance>, result: Option<&TestResult>) {
        self.finished += 1;
        let Some(result) = result else {
            self.no_result += 1;
            return;
        };
        match result {
            TestResult::Skipped => self.skipped += 1,
            result if result.has_unexpected_output() => {
                if result.status() == Some(RunStatus::Crash) {
                    self.crashed += 1;
                } else {
                    self.failed += 1;
                }
            }
            result => {
                self.passed += 1;
                if is_flaky(result) {
                    self.flaky += 1;
                }
            }
        }
        self.collect_failures(test, result);
    }

    fn collect_failures(&mut self, test: &Arc<TestInstance>, result: &TestResult) {
        match result {
            TestResult::Skipped => {}
            TestResult::Single(single) => {
                if single.has_unexpected_output {
                    self.failures.push(FailureRecord {
                        procid: test.procid().clone(),
                        attempts: 1,
                        result: single.clone(),
                    });
                }
            }
            TestResult::Rerun(rerun) => {
                if rerun.has_unexpected_output() {
                    self.failures.push(FailureRecord {
                        procid: test.procid().clone(),
                        attempts: rerun.attempts().len(),
                        result: rerun.last().clone(),
                    });
                }
            }
            TestResult::Grouped(grouped) => {
                for (member, result) in &grouped.results {
                    self.collect_failures(member, result);
                }
            }
        }
    }
}

fn is_flaky(result: &TestResult) -> bool {
    match result {
        TestResult::Rerun(rerun) => rerun.is_flaky(),
        TestResult::Grouped(grouped) => grouped.results.iter().any(|(_, r)| is_flaky(r)),
        TestResult::Skipped | TestResult::Single(_) => false,
    }
}

impl FailureRecord {
    fn to_summary(&self) -> FailureSummary {
        let output = self.result.output.as_ref();
        FailureSummary {
            procid: self.procid.to_string(),
            status: self.result.status,
            attempts: self.attempts,
            command: self.result.command.as_ref().map(ToString::to_string),
            exit_code: output.and_then(|o| o.exit_code),
            stdout: output.and_then(|o| o.stdout.clone()),
            stderr: output.and_then(|o| o.stderr.clone()),
            error_details: self.result.error_details.clone(),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} tests loaded, {} finished",
            self.loaded, self.finished
        )?;
        writeln!(f, "  passed:    {} ({} flaky)", self.passed, self.flaky)?;
        writeln!(f, "  failed:    {}", self.failed)?;
        writeln!(f, "  crashed:   {}", self.crashed)?;
        writeln!(f, "  skipped:   {}", self.skipped)?;
        writeln!(f, "  no result: {}", self.no_result)?;
        if let Some(reason) = &self.stop_reason {
            writeln!(f, "stopped early: {reason}")?;
        }
        if let Some(error) = &self.internal_error {
            writeln!(f, "internal error: {error}")?;
        }

        for failure in &self.failures {
            writeln!(f)?;
            write!(f, "--- {}: {}", failure.result.status, failure.procid)?;
            if failure.attempts > 1 {
                write!(f, " ({} attempts)", failure.attempts)?;
            }
            writeln!(f)?;
            if let Some(command) = &failure.result.command {
                writeln!(f, "command: {command}")?;
            }
            if let Some(output) = &failure.result.output {
                match (output.exit_code, output.signal) {
                    (Some(code), _) => writeln!(f, "exit code: {code}")?,
                    (None, Some(signal)) => writeln!(f, "signal: {signal}")?,
                    (None, None) => {}
                }
                if output.timed_out {
                    writeln!(f, "timed out after {:.3}s", output.duration.as_secs_f64())?;
                }
                for (name, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
                    if let Some(text) = text.as_deref().filter(|text| !text.is_empty()) {
                        writeln!(f, "{name}:")?;
                        writeln!(f, "{}", text.trim_end())?;
                    }
                }
            }
            if let Some(details) = &failure.result.error_details {
                writeln!(f, "error: {details}")?;
            }
        }
        Ok(())
    }
}

/// Why a run ended, ordered by severity.
///
/// The final exit code is that of the most severe kind that applies.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ExitKind {
    /// Every test matched its expected outcomes.
    Ok,

    /// No test ran.
    NoTests,

    /// Some test had unexpected output, or the run stopped before every test finished.
    TestsFailed,

    /// The execution pool failed.
    InternalError,

    /// The run was interrupted.
    Interrupted,

    /// The run was terminated.
    Terminated,
}

impl ExitKind {
    /// Returns the process exit code for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => PipetestExitCode::OK,
            Self::NoTests => PipetestExitCode::NO_TESTS,
            Self::TestsFailed => PipetestExitCode::TESTS_FAILED,
            Self::InternalError => PipetestExitCode::INTERNAL_ERROR,
            Self::Interrupted => PipetestExitCode::INTERRUPTED,
            Self::Terminated => PipetestExitCode::TERMINATED,
        }
    }
}

impl From<ShutdownEvent> for ExitKind {
    fn from(event: ShutdownEvent) -> Self {
        match event {
            ShutdownEvent::Interrupt => Self::Interrupted,
            ShutdownEvent::Term => Self::Terminated,
        }
    }
}

/// Returns the exit code for a run: the most severe of the run's own outcome and the shutdown
/// signal received, if any.
pub fn final_exit_code(summary: &RunSummary, signal: Option<ShutdownEvent>) -> i32 {
    let run_kind = summary.exit_kind();
    signal
        .map(ExitKind::from)
        .map_or(run_kind, |kind| kind.max(run_kind))
        .exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        result::{GroupedResult, RerunResult, test_helpers::single},
        test_command::TestCommand,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn test(path: &str) -> Arc<TestInstance> {
        Arc::new(TestInstance::new("mjsunit", path))
    }

    fn crashed() -> SingleResult {
        let mut result = single(true);
        result.status = RunStatus::Crash;
        if let Some(output) = &mut result.output {
            output.exit_code = None;
            output.signal = Some(11);
        }
        result
    }

    fn summary_of(results: Vec<(Arc<TestInstance>, Option<TestResult>)>) -> RunSummary {
        let mut summary = RunSummary::default();
        for (test, result) in &results {
            summary.record_loaded();
            summary.record(test, result.as_ref());
        }
        summary
    }

    #[test]
    fn counts_each_root_once() {
        let variants = GroupedResult {
            results: vec![
                (test("a.js"), TestResult::Single(single(false))),
                (
                    test("a.js"),
                    TestResult::Rerun(
                        RerunResult::new(vec![single(true), single(false)]).expect("non-empty"),
                    ),
                ),
            ],
        };
        let summary = summary_of(vec![
            (test("a.js"), Some(TestResult::Grouped(variants))),
            (test("b.js"), Some(TestResult::Single(single(true)))),
            (test("c.js"), Some(TestResult::Single(crashed()))),
            (test("d.js"), Some(TestResult::Skipped)),
            (test("e.js"), None),
        ]);

        assert_eq!(summary.loaded(), 5);
        assert_eq!(summary.finished(), 5);
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.flaky(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.crashed(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.no_result(), 1);
        assert_eq!(summary.failures().len(), 2);
        assert_eq!(summary.exit_kind(), ExitKind::TestsFailed);
    }

    #[test]
    fn grouped_failures_name_the_member() {
        let member = Arc::new(TestInstance::new("mjsunit", "a.js"));
        let grouped = GroupedResult {
            results: vec![(
                Arc::clone(&member),
                TestResult::Rerun(
                    RerunResult::new(vec![single(true), single(true), single(true)])
                        .expect("non-empty"),
                ),
            )],
        };
        let summary = summary_of(vec![(test("a.js"), Some(TestResult::Grouped(grouped)))]);

        let failure = &summary.failures()[0];
        assert_eq!(failure.procid, *member.procid());
        assert_eq!(failure.attempts, 3);
        assert_eq!(summary.failed(), 1);
    }

    #[test]
    fn display_is_deterministic() {
        let mut failing = single(true);
        failing.command = Some(TestCommand::new(
            "/out/d8",
            ["--no-opt".to_owned(), "test/mjsunit/b.js".to_owned()],
            std::time::Duration::from_secs(60),
        ));
        let mut summary = summary_of(vec![
            (test("a.js"), Some(TestResult::Single(single(false)))),
            (test("b.js"), Some(TestResult::Single(failing))),
        ]);
        summary.record_loaded();
        summary.set_stop_reason(Some("tracker: reached the failure limit (1)".to_owned()));

        assert_eq!(
            summary.to_string(),
            indoc! {"
                3 tests loaded, 2 finished
                  passed:    1 (0 flaky)
                  failed:    1
                  crashed:   0
                  skipped:   0
                  no result: 0
                stopped early: tracker: reached the failure limit (1)

                --- FAIL: mjsunit/b.js
                command: /out/d8 --no-opt test/mjsunit/b.js
                exit code: 1
                stdout:
                out
                stderr:
                err
            "}
        );
    }

    #[test]
    fn final_summary_carries_failure_evidence() {
        let summary = summary_of(vec![(test("c.js"), Some(TestResult::Single(crashed())))]);
        let final_summary = summary.to_final();

        assert_eq!(final_summary.crashed, 1);
        assert!(!final_summary.stopped);
        let failure = &final_summary.failures[0];
        assert_eq!(failure.procid, "mjsunit/c.js");
        assert_eq!(failure.status, RunStatus::Crash);
        assert_eq!(failure.exit_code, None);
        assert_eq!(failure.stderr.as_deref(), Some("err"));
    }

    #[test]
    fn empty_run_has_no_tests() {
        let summary = RunSummary::default();
        assert!(summary.is_success());
        assert_eq!(summary.exit_kind(), ExitKind::NoTests);

        let skipped = summary_of(vec![(test("a.js"), Some(TestResult::Skipped))]);
        assert_eq!(skipped.exit_kind(), ExitKind::NoTests);
    }

    #[test_case(ExitKind::Ok, None, PipetestExitCode::OK; "ok")]
    #[test_case(ExitKind::TestsFailed, None, PipetestExitCode::TESTS_FAILED; "failed")]
    #[test_case(
        ExitKind::TestsFailed,
        Some(ShutdownEvent::Interrupt),
        PipetestExitCode::INTERRUPTED
        ; "interrupt beats failures"
    )]
    #[test_case(
        ExitKind::InternalError,
        Some(ShutdownEvent::Term),
        PipetestExitCode::TERMINATED
        ; "term beats internal error"
    )]
    #[test_case(
        ExitKind::InternalError,
        None,
        PipetestExitCode::INTERNAL_ERROR
        ; "internal error"
    )]
    fn exit_code_is_most_severe(run: ExitKind, signal: Option<ShutdownEvent>, expected: i32) {
        let failing = run != ExitKind::Ok;
        let mut summary =
            summary_of(vec![(test("a.js"), Some(TestResult::Single(single(failing))))]);
        if run == ExitKind::InternalError {
            summary.set_internal_error(PoolError::WorkersDisconnected { outstanding: 1 });
        }
        assert_eq!(summary.exit_kind(), run);
        assert_eq!(final_exit_code(&summary, signal), expected);
    }

    #[test]
    fn internal_error_keeps_the_partial_summary() {
        let mut summary = summary_of(vec![
            (test("a.js"), Some(TestResult::Single(single(false)))),
            (test("b.js"), Some(TestResult::Single(single(true)))),
        ]);
        summary.set_stop_reason(Some("internal pool error".to_owned()));
        summary.set_internal_error(PoolError::WorkersDisconnected { outstanding: 2 });

        assert!(!summary.is_success());
        assert_eq!(summary.exit_kind(), ExitKind::InternalError);
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failures().len(), 1, "failures seen before the error are kept");

        let final_summary = summary.to_final();
        assert!(final_summary.stopped);
        assert_eq!(
            final_summary.internal_error.as_deref(),
            Some("all pool workers exited with 2 jobs still outstanding")
        );
        assert!(
            summary.to_string().contains("\ninternal error: "),
            "{summary}"
        );
    }
}
