// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output classifiers decide whether a process run matched its test's expectations.
//!
//! Classifiers are pluggable per suite through
//! [`ExecutionStage::with_classifier`](crate::stages::ExecutionStage::with_classifier). Suites
//! without an override use [`default_classifier`].

use crate::{result::ProcessOutput, test_instance::ExpectedOutcomes};
use pipetest_metadata::{Outcome, RunStatus};
use std::{fmt, sync::Arc};

/// What a classifier decided about one run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Verdict {
    /// Whether the run produced an outcome its test did not expect.
    pub has_unexpected_output: bool,

    /// The coarse status of the run.
    pub status: RunStatus,
}

impl Verdict {
    /// Builds a verdict for `output`, given whether it was expected.
    pub fn new(output: &ProcessOutput, expected: bool) -> Self {
        let status = if expected {
            RunStatus::Pass
        } else if output.has_crashed() {
            RunStatus::Crash
        } else {
            RunStatus::Fail
        };
        Self {
            has_unexpected_output: !expected,
            status,
        }
    }
}

/// Compares raw process output against a test's expected outcomes.
///
/// Classifiers run on pool workers.
pub trait OutputClassifier: fmt::Debug + Send + Sync {
    /// Classifies one run.
    fn classify(&self, output: &ProcessOutput, expected: &ExpectedOutcomes) -> Verdict;
}

/// The fast path for tests that are only allowed to pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassOnlyClassifier;

impl OutputClassifier for PassOnlyClassifier {
    fn classify(&self, output: &ProcessOutput, _expected: &ExpectedOutcomes) -> Verdict {
        Verdict::new(output, output.outcome() == Outcome::Pass)
    }
}

/// Accepts any outcome in the test's expected set.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpectedOutcomesClassifier;

impl OutputClassifier for ExpectedOutcomesClassifier {
    fn classify(&self, output: &ProcessOutput, expected: &ExpectedOutcomes) -> Verdict {
        Verdict::new(output, expected.contains(output.outcome()))
    }
}

/// Returns the classifier used for a test with no suite-specific override.
pub fn default_classifier(expected: &ExpectedOutcomes) -> Arc<dyn OutputClassifier> {
    if expected.is_pass_only() {
        Arc::new(PassOnlyClassifier)
    } else {
        Arc::new(ExpectedOutcomesClassifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::test_helpers::process_output;

    #[test]
    fn pass_only_fast_path() {
        let expected = ExpectedOutcomes::pass_only();
        let classifier = default_classifier(&expected);

        let verdict = classifier.classify(&process_output(0, "", ""), &expected);
        assert_eq!(
            verdict,
            Verdict {
                has_unexpected_output: false,
                status: RunStatus::Pass
            }
        );

        let verdict = classifier.classify(&process_output(1, "", ""), &expected);
        assert_eq!(
            verdict,
            Verdict {
                has_unexpected_output: true,
                status: RunStatus::Fail
            }
        );
    }

    #[test]
    fn expected_failures_and_crashes() {
        let expected = ExpectedOutcomes::new([Outcome::Fail]);
        let classifier = default_classifier(&expected);

        let verdict = classifier.classify(&process_output(1, "", ""), &expected);
        assert!(!verdict.has_unexpected_output, "expected failure");
        assert_eq!(verdict.status, RunStatus::Pass);

        let verdict = classifier.classify(&process_output(0, "", ""), &expected);
        assert!(verdict.has_unexpected_output, "unexpected pass");
        assert_eq!(verdict.status, RunStatus::Fail);

        let crashed = ProcessOutput {
            exit_code: None,
            signal: Some(11),
            ..process_output(0, "", "")
        };
        let verdict = classifier.classify(&crashed, &expected);
        assert_eq!(verdict.status, RunStatus::Crash);

        let expected = ExpectedOutcomes::new([Outcome::Crash]);
        let verdict = ExpectedOutcomesClassifier.classify(&crashed, &expected);
        assert_eq!(verdict.status, RunStatus::Pass, "expected crashes pass");
    }
}
