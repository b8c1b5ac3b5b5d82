// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::{RerunResult, ResultRequirement, SingleResult, TestResult},
    test_instance::{ProcedureId, TestInstance},
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

/// Reruns tests whose first run did not match expectations.
///
/// A test is rerun up to `max_per_test` times, stopping as soon as a run matches. An optional
/// budget caps the total number of reruns across all tests; it is charged when a rerun is
/// dispatched, in dispatch order. A test that ran once is reported as that single result; a test
/// that was rerun is reported as a [`Rerun`](TestResult::Rerun) result carrying every attempt.
#[derive(Debug)]
pub struct RerunProducer {
    max_per_test: usize,
    budget: Option<usize>,
    pending: HashMap<ProcedureId, RerunState>,
}

#[derive(Debug)]
struct RerunState {
    origin: Arc<TestInstance>,
    attempts: Vec<SingleResult>,
}

impl RerunProducer {
    /// Creates a producer that reruns each failing test up to `max_per_test` times.
    pub fn new(max_per_test: usize) -> Self {
        Self {
            max_per_test,
            budget: None,
            pending: HashMap::new(),
        }
    }

    /// Caps the total number of reruns across every test.
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.budget = Some(max_total);
        self
    }

    /// Returns the remaining global budget, if one was configured.
    pub fn remaining_budget(&self) -> Option<usize> {
        self.budget
    }

    /// Returns the number of tests with a run in flight.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn try_charge_budget(&mut self) -> bool {
        match &mut self.budget {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}

impl Stage for RerunProducer {
    fn name(&self) -> &str {
        "rerun"
    }

    fn requirement(&self) -> ResultRequirement {
        ResultRequirement::DropOutput
    }

    fn generates_tests(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        let subtest = cx.subtest(&test, 0).build();
        self.pending.insert(
            test.procid().clone(),
            RerunState {
                origin: test,
                attempts: Vec::new(),
            },
        );
        cx.send_test(subtest);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        let Some(origin) = test.origin() else {
            cx.send_result(test, result);
            return;
        };
        let Some(mut state) = self.pending.remove(origin.procid()) else {
            debug!("{test}: result after its reruns were abandoned");
            return;
        };

        let single = match result {
            Some(TestResult::Single(single)) => single,
            other => {
                cx.send_result(state.origin, other);
                return;
            }
        };
        let unexpected = single.has_unexpected_output;
        state.attempts.push(single);

        if unexpected
            && !cx.is_stopped()
            && state.attempts.len() <= self.max_per_test
            && self.try_charge_budget()
        {
            let attempt = state.attempts.len();
            info!(
                "rerunning {} (attempt {} of {})",
                state.origin,
                attempt + 1,
                self.max_per_test + 1
            );
            let subtest = cx.subtest(&state.origin, attempt).keep_output().build();
            self.pending.insert(state.origin.procid().clone(), state);
            cx.send_test(subtest);
            return;
        }
        if unexpected && self.budget == Some(0) {
            debug!("rerun budget exhausted, not rerunning {}", state.origin);
        }

        let result = if state.attempts.len() == 1 {
            state.attempts.pop().map(TestResult::Single)
        } else {
            RerunResult::new(state.attempts).map(TestResult::Rerun)
        };
        cx.send_result(state.origin, result);
    }

    fn stop(&mut self) {
        self.pending.clear();
    }
}
