// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::OutcomeParseError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A keyword attached to a test by a status file.
///
/// Some keywords describe an outcome the test is allowed to produce when it runs (`PASS`, `FAIL`,
/// `CRASH`, `TIMEOUT`), the rest are attributes that influence scheduling (`SKIP`, `SLOW`,
/// `HEAVY`). `FAIL_OK` is accepted as an alias-like outcome: a test marked with it is expected to
/// fail, and the failure is not worth reporting.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The test exits successfully.
    Pass,

    /// The test exits with a failure code.
    Fail,

    /// The test fails, and that's fine.
    FailOk,

    /// The test process crashes (is killed by a signal it did not ask for).
    Crash,

    /// The test runs past its timeout.
    Timeout,

    /// The test should not be run at all.
    Skip,

    /// The test takes much longer than usual; its timeout is extended.
    Slow,

    /// The test is resource-intensive and subject to an extra concurrency cap.
    Heavy,
}

impl Outcome {
    /// Every outcome keyword, in declaration order.
    pub const ALL: [Outcome; 8] = [
        Outcome::Pass,
        Outcome::Fail,
        Outcome::FailOk,
        Outcome::Crash,
        Outcome::Timeout,
        Outcome::Skip,
        Outcome::Slow,
        Outcome::Heavy,
    ];

    /// Returns the status-file spellings of all outcomes.
    pub fn variants() -> [&'static str; 8] {
        [
            "PASS", "FAIL", "FAIL_OK", "CRASH", "TIMEOUT", "SKIP", "SLOW", "HEAVY",
        ]
    }

    /// Returns the status-file spelling of this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::FailOk => "FAIL_OK",
            Outcome::Crash => "CRASH",
            Outcome::Timeout => "TIMEOUT",
            Outcome::Skip => "SKIP",
            Outcome::Slow => "SLOW",
            Outcome::Heavy => "HEAVY",
        }
    }

    /// Returns the outcome a running test can actually produce for this keyword, if any.
    ///
    /// `FAIL_OK` maps to [`Outcome::Fail`]; scheduling attributes map to `None`.
    pub fn runtime_outcome(self) -> Option<Outcome> {
        match self {
            Outcome::Pass | Outcome::Fail | Outcome::Crash | Outcome::Timeout => Some(self),
            Outcome::FailOk => Some(Outcome::Fail),
            Outcome::Skip | Outcome::Slow | Outcome::Heavy => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = OutcomeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let outcome = match s {
            "PASS" => Outcome::Pass,
            "FAIL" => Outcome::Fail,
            "FAIL_OK" => Outcome::FailOk,
            "CRASH" => Outcome::Crash,
            "TIMEOUT" => Outcome::Timeout,
            "SKIP" => Outcome::Skip,
            "SLOW" => Outcome::Slow,
            "HEAVY" => Outcome::Heavy,
            other => return Err(OutcomeParseError::new(other)),
        };
        Ok(outcome)
    }
}

/// The coarse status of one execution of a test.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// The test produced an outcome it was expected to produce.
    Pass,

    /// The test produced an unexpected outcome without crashing.
    Fail,

    /// The test produced an unexpected outcome by crashing.
    Crash,
}

impl RunStatus {
    /// Returns true if the status is [`RunStatus::Pass`].
    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::Pass)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pass => write!(f, "PASS"),
            RunStatus::Fail => write!(f, "FAIL"),
            RunStatus::Crash => write!(f, "CRASH"),
        }
    }
}

#[cfg(feature = "proptest1")]
mod proptest_impls {
    use super::Outcome;
    use proptest::prelude::*;

    impl Arbitrary for Outcome {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            proptest::sample::select(Outcome::ALL.to_vec()).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("PASS", Outcome::Pass ; "pass")]
    #[test_case("FAIL_OK", Outcome::FailOk ; "fail ok")]
    #[test_case("TIMEOUT", Outcome::Timeout ; "timeout")]
    #[test_case("HEAVY", Outcome::Heavy ; "heavy")]
    fn outcome_from_str(input: &str, expected: Outcome) {
        assert_eq!(input.parse::<Outcome>().unwrap(), expected);
        assert_eq!(expected.to_string(), input, "display round-trips");
    }

    #[test]
    fn outcome_from_str_rejects_unknown() {
        let err = "pass".parse::<Outcome>().unwrap_err();
        assert_eq!(err.input(), "pass", "keywords are case-sensitive");

        "NO_VARIANTS"
            .parse::<Outcome>()
            .expect_err("unknown keyword is rejected");
    }

    #[test]
    fn runtime_outcomes() {
        let runtime: Vec<_> = Outcome::ALL
            .iter()
            .filter_map(|outcome| outcome.runtime_outcome())
            .collect();
        assert_eq!(
            runtime,
            vec![
                Outcome::Pass,
                Outcome::Fail,
                Outcome::Fail,
                Outcome::Crash,
                Outcome::Timeout
            ]
        );
    }
}
