// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::RunStatus;
use serde::{Deserialize, Serialize};

/// Machine-readable summary of a finished run.
///
/// This is what report writers consume once the pipeline has drained. Counts are over the results
/// that reached the head of the pipeline: one per loaded test.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FinalRunSummary {
    /// The number of tests loaded into the pipeline.
    pub loaded: usize,

    /// The number of tests a result was reported for.
    pub finished: usize,

    /// Tests whose results matched expectations. Includes `flaky`.
    pub passed: usize,

    /// Tests that only matched expectations after being rerun.
    pub flaky: usize,

    /// Tests with unexpected output that did not crash.
    pub failed: usize,

    /// Tests with unexpected output that crashed.
    pub crashed: usize,

    /// Tests dropped before running.
    pub skipped: usize,

    /// Whether the run was stopped before every loaded test finished.
    pub stopped: bool,

    /// The internal error that ended the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_error: Option<String>,

    /// Details for every unexpected result, in the order they were reported.
    pub failures: Vec<FailureSummary>,
}

impl FinalRunSummary {
    /// Parses a summary from JSON.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Serializes this summary to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// One unexpected result, with the evidence that was retained for it.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FailureSummary {
    /// The procedure id of the test that ran.
    pub procid: String,

    /// The status of the last attempt.
    pub status: RunStatus,

    /// The number of attempts made, including reruns.
    pub attempts: usize,

    /// The command line of the last attempt, if retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// The exit code of the last attempt, if the process exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Standard output of the last attempt, if retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Standard error of the last attempt, if retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Errors encountered while trying to run the test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}
