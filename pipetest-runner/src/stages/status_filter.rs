// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::StatusFilterModeParseError,
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::TestInstance,
};
use serde::Deserialize;
use std::{fmt, str::FromStr, sync::Arc};
use tracing::debug;

/// What to do with tests that carry a status-file attribute.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilterMode {
    /// Run only the tests that carry the attribute.
    Run,

    /// Skip the tests that carry the attribute.
    Skip,

    /// Ignore the attribute.
    #[default]
    DontCare,
}

impl StatusFilterMode {
    /// Returns the string representations of all known variants.
    pub fn variants() -> &'static [&'static str] {
        &["run", "skip", "dontcare"]
    }

    fn keeps(self, has_attribute: bool) -> bool {
        match self {
            StatusFilterMode::Run => has_attribute,
            StatusFilterMode::Skip => !has_attribute,
            StatusFilterMode::DontCare => true,
        }
    }
}

impl FromStr for StatusFilterMode {
    type Err = StatusFilterModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(StatusFilterMode::Run),
            "skip" => Ok(StatusFilterMode::Skip),
            "dontcare" => Ok(StatusFilterMode::DontCare),
            other => Err(StatusFilterModeParseError::new(other)),
        }
    }
}

impl fmt::Display for StatusFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusFilterMode::Run => "run",
            StatusFilterMode::Skip => "skip",
            StatusFilterMode::DontCare => "dontcare",
        };
        f.write_str(s)
    }
}

/// Drops tests the status file marks `SKIP`, and optionally slow or flaky tests.
#[derive(Clone, Debug, Default)]
pub struct StatusFileFilter {
    slow_tests: StatusFilterMode,
    pass_fail_tests: StatusFilterMode,
}

impl StatusFileFilter {
    /// Creates a new filter.
    pub fn new(slow_tests: StatusFilterMode, pass_fail_tests: StatusFilterMode) -> Self {
        Self {
            slow_tests,
            pass_fail_tests,
        }
    }

    fn keeps(&self, test: &TestInstance) -> bool {
        let attributes = test.attributes();
        !attributes.skip
            && self.slow_tests.keeps(attributes.slow)
            && self.pass_fail_tests.keeps(attributes.pass_or_fail)
    }
}

impl Stage for StatusFileFilter {
    fn name(&self) -> &str {
        "status-filter"
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        if self.keeps(&test) {
            cx.send_test(test);
        } else {
            debug!("{test}: skipped by status file");
            cx.send_result(test, Some(TestResult::Skipped));
        }
    }
}
