// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::MaxFail,
    pipeline::{Stage, StageContext},
    result::{ResultRequirement, TestResult},
    test_instance::TestInstance,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing::info;

/// Counts seen by a [`ResultsTracker`]. Cheap to clone; every clone sees the same counts.
#[derive(Clone, Debug, Default)]
pub struct TrackerCounts {
    inner: Arc<CountsInner>,
}

#[derive(Debug, Default)]
struct CountsInner {
    total: AtomicUsize,
    failed: AtomicUsize,
}

impl TrackerCounts {
    /// Returns the number of results seen that were not skipped.
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Returns the number of results with unexpected output.
    pub fn failed(&self) -> usize {
        self.inner.failed.load(Ordering::Relaxed)
    }
}

/// Counts results passing through and stops the pipeline once too many tests have failed.
#[derive(Debug)]
pub struct ResultsTracker {
    max_fail: MaxFail,
    counts: TrackerCounts,
}

impl ResultsTracker {
    /// Creates a new tracker.
    pub fn new(max_fail: MaxFail) -> Self {
        Self {
            max_fail,
            counts: TrackerCounts::default(),
        }
    }

    /// Returns a handle to the counts.
    pub fn counts(&self) -> TrackerCounts {
        self.counts.clone()
    }
}

impl Stage for ResultsTracker {
    fn name(&self) -> &str {
        "tracker"
    }

    fn requirement(&self) -> ResultRequirement {
        ResultRequirement::DropOutput
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        cx.send_test(test);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        if !matches!(result, None | Some(TestResult::Skipped)) {
            self.counts.inner.total.fetch_add(1, Ordering::Relaxed);
        }
        if result
            .as_ref()
            .is_some_and(TestResult::has_unexpected_output)
        {
            let failed = self.counts.inner.failed.fetch_add(1, Ordering::Relaxed) + 1;
            if self.max_fail.is_exceeded(failed) {
                info!("{failed} tests failed, stopping run");
                cx.stop(format!("reached the failure limit ({})", self.max_fail));
            }
        }
        cx.send_result(test, result);
    }
}
