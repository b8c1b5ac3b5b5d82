// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::TestInstance,
};
use std::sync::Arc;

/// Accepts `TIMEOUT` as an outcome for every test, without changing flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForgiveTimeout;

impl Stage for ForgiveTimeout {
    fn name(&self) -> &str {
        "forgive"
    }

    fn generates_tests(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        let expected = test.expected().with_timeout();
        let subtest = cx.subtest(&test, "timeout").expected(expected).build();
        cx.send_test(subtest);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        match test.origin() {
            Some(origin) => cx.send_result(Arc::clone(origin), result),
            None => cx.send_result(test, result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_helpers::{StageHarness, passed, root};
    use pipetest_metadata::Outcome;

    #[test]
    fn widens_expectations_and_forwards_to_origin() {
        let mut harness = StageHarness::new(ForgiveTimeout);
        let test = root("a.js");
        harness.next_test(Arc::clone(&test));

        let subtest = harness.take_tests().remove(0);
        assert!(subtest.expected().contains(Outcome::Timeout));
        assert!(subtest.expected().contains(Outcome::Pass));
        assert_eq!(subtest.flags(), test.flags());

        harness.result_for(subtest, passed());
        let results = harness.take_results();
        assert_eq!(results.len(), 1);
        assert!(Arc::ptr_eq(&results[0].0, &test));
        assert!(results[0].1.is_some());
    }
}
