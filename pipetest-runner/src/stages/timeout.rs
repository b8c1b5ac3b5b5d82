// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::{ResultRequirement, TestResult},
    stopwatch::{StopwatchStart, stopwatch},
    test_instance::TestInstance,
};
use std::{sync::Arc, time::Duration};
use tracing::info;

/// Stops the pipeline once the whole run has taken longer than a fixed budget.
///
/// The clock starts when the pipeline is built. Elapsed time is checked on every test, result and
/// heartbeat, so the budget is enforced even while no test finishes.
#[derive(Debug)]
pub struct TimeoutWatchdog {
    total_timeout: Duration,
    start: StopwatchStart,
    expired: bool,
}

impl TimeoutWatchdog {
    /// Creates a watchdog with the given budget.
    pub fn new(total_timeout: Duration) -> Self {
        Self {
            total_timeout,
            start: stopwatch(),
            expired: false,
        }
    }

    /// Returns the budget.
    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// Returns true once the budget has been exceeded.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    fn check(&mut self, cx: &mut StageContext<'_>) {
        if self.expired {
            return;
        }
        let elapsed = self.start.elapsed();
        if elapsed >= self.total_timeout {
            self.expired = true;
            info!(
                "run exceeded its total timeout after {}",
                humantime::format_duration(elapsed)
            );
            cx.stop(format!(
                "total timeout of {} exceeded",
                humantime::format_duration(self.total_timeout)
            ));
        }
    }
}

impl Stage for TimeoutWatchdog {
    fn name(&self) -> &str {
        "timeout"
    }

    fn setup(&mut self, _requirement: ResultRequirement) {
        self.start = stopwatch();
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        self.check(cx);
        cx.send_test(test);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        self.check(cx);
        cx.send_result(test, result);
    }

    fn heartbeat(&mut self, cx: &mut StageContext<'_>) {
        self.check(cx);
    }
}
