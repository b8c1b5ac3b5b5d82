// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::TestInstance,
};
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

/// Limits how many heavy tests are in flight downstream at once.
///
/// Heavy tests past the limit are buffered in arrival order and released one for one as heavy
/// results come back. Other tests pass straight through.
#[derive(Debug)]
pub struct SequenceLimiter {
    max_heavy: usize,
    in_flight: usize,
    buffer: VecDeque<Arc<TestInstance>>,
}

impl SequenceLimiter {
    /// Creates a limiter that allows `max_heavy` heavy tests at once (at least one).
    pub fn new(max_heavy: usize) -> Self {
        Self {
            max_heavy: max_heavy.max(1),
            in_flight: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Returns the number of heavy tests waiting to be released.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Stage for SequenceLimiter {
    fn name(&self) -> &str {
        "sequence"
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        if !test.attributes().heavy {
            cx.send_test(test);
        } else if self.in_flight < self.max_heavy {
            self.in_flight += 1;
            cx.send_test(test);
        } else {
            debug!("{test}: buffered behind {} heavy tests", self.in_flight);
            self.buffer.push_back(test);
        }
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        let heavy = test.attributes().heavy;
        cx.send_result(test, result);
        if !heavy {
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        if cx.is_stopped() {
            return;
        }
        if let Some(next) = self.buffer.pop_front() {
            self.in_flight += 1;
            cx.send_test(next);
        }
    }

    fn stop(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::test_helpers::{StageHarness, passed},
        test_instance::TestAttributes,
    };

    fn heavy(path: &str) -> Arc<TestInstance> {
        Arc::new(TestInstance::new("suite", path).with_attributes(TestAttributes {
            heavy: true,
            ..TestAttributes::default()
        }))
    }

    fn paths(tests: &[Arc<TestInstance>]) -> Vec<&str> {
        tests.iter().map(|test| test.path()).collect()
    }

    #[test]
    fn heavy_tests_are_released_in_order() {
        let mut harness = StageHarness::new(SequenceLimiter::new(2));
        for path in ["h1", "h2", "h3", "h4"] {
            harness.next_test(heavy(path));
        }
        harness.next_test(Arc::new(TestInstance::new("suite", "light")));

        assert_eq!(paths(&harness.take_tests()), ["h1", "h2", "light"]);
        assert_eq!(harness.stage.buffered(), 2);

        harness.result_for(heavy("h2"), passed());
        assert_eq!(paths(&harness.take_tests()), ["h3"]);
        harness.result_for(Arc::new(TestInstance::new("suite", "light")), passed());
        assert!(harness.take_tests().is_empty(), "light results release nothing");
        harness.result_for(heavy("h1"), passed());
        assert_eq!(paths(&harness.take_tests()), ["h4"]);

        assert_eq!(harness.take_results().len(), 3);
    }

    #[test]
    fn stop_discards_buffered_tests() {
        let mut harness = StageHarness::new(SequenceLimiter::new(1));
        harness.next_test(heavy("h1"));
        harness.next_test(heavy("h2"));
        harness.stage.stop();
        assert_eq!(harness.stage.buffered(), 0);
    }
}
