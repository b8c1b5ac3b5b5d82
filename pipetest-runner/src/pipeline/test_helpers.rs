// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives a single stage in isolation and records what it emits.

use super::{Stage, StageAction, StageContext};
use crate::{
    result::{ResultRequirement, SingleResult, TestResult, test_helpers::single},
    test_instance::{StageId, TestInstance},
};
use std::sync::Arc;

pub(crate) struct StageHarness<S> {
    pub(crate) stage: S,
    name: String,
    stage_id: StageId,
    pub(crate) sent_tests: Vec<Arc<TestInstance>>,
    pub(crate) sent_results: Vec<(Arc<TestInstance>, Option<TestResult>)>,
    pub(crate) stop_reasons: Vec<String>,
    stopped: bool,
}

impl<S: Stage> StageHarness<S> {
    /// Wraps `stage` as stage 1 of a pipeline and runs setup with `DropResult`.
    pub(crate) fn new(stage: S) -> Self {
        Self::with_requirement(stage, ResultRequirement::DropResult)
    }

    pub(crate) fn with_requirement(mut stage: S, requirement: ResultRequirement) -> Self {
        stage.setup(requirement);
        Self {
            name: stage.name().to_owned(),
            stage,
            stage_id: StageId(1),
            sent_tests: Vec::new(),
            sent_results: Vec::new(),
            stop_reasons: Vec::new(),
            stopped: false,
        }
    }

    pub(crate) fn next_test(&mut self, test: Arc<TestInstance>) {
        self.dispatch(|stage, cx| stage.next_test(test, cx));
    }

    pub(crate) fn result_for(&mut self, test: Arc<TestInstance>, result: Option<TestResult>) {
        self.dispatch(|stage, cx| stage.result_for(test, result, cx));
    }

    pub(crate) fn heartbeat(&mut self) {
        self.dispatch(|stage, cx| stage.heartbeat(cx));
    }

    /// Stops the pipeline from outside the stage, as another stage would.
    pub(crate) fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stage.stop();
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Takes the tests sent forward so far.
    pub(crate) fn take_tests(&mut self) -> Vec<Arc<TestInstance>> {
        std::mem::take(&mut self.sent_tests)
    }

    /// Takes the results sent backward so far.
    pub(crate) fn take_results(&mut self) -> Vec<(Arc<TestInstance>, Option<TestResult>)> {
        std::mem::take(&mut self.sent_results)
    }

    fn dispatch(&mut self, f: impl FnOnce(&mut S, &mut StageContext<'_>)) {
        let mut actions = Vec::new();
        {
            let mut cx = StageContext::new(self.stage_id, &self.name, self.stopped, &mut actions);
            f(&mut self.stage, &mut cx);
        }
        for action in actions {
            match action {
                StageAction::SendTest(test) => {
                    if !self.stopped {
                        self.sent_tests.push(test);
                    }
                }
                StageAction::SendResult(test, result) => self.sent_results.push((test, result)),
                StageAction::Stop(reason) => {
                    if !self.stopped {
                        self.stopped = true;
                        self.stage.stop();
                    }
                    self.stop_reasons.push(reason);
                }
            }
        }
    }
}

pub(crate) fn root(path: &str) -> Arc<TestInstance> {
    Arc::new(TestInstance::new("suite", path))
}

pub(crate) fn passed() -> Option<TestResult> {
    Some(TestResult::Single(single(false)))
}

pub(crate) fn failed() -> Option<TestResult> {
    Some(TestResult::Single(single(true)))
}

pub(crate) fn unwrap_single(result: Option<&TestResult>) -> &SingleResult {
    match result {
        Some(TestResult::Single(single)) => single,
        other => panic!("expected a single result, found {other:?}"),
    }
}
