// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test-processing pipeline.
//!
//! A pipeline is a chain of [`Stage`]s followed by a terminal
//! [`ExecutionStage`](crate::stages::ExecutionStage). Tests flow forward from the head, one stage
//! at a time; results flow backward along the same chain. Stages never hold references to their
//! neighbours: they emit actions through a [`StageContext`], and the pipeline routes them.
//!
//! The chain is driven by a single coordinator thread. Each `next_test`/`result_for` call runs to
//! completion before the next message is delivered, so stage state is never accessed concurrently.
//! The only place the coordinator waits is the execution pool's outcome stream, which yields a
//! heartbeat at least once per heartbeat timeout.

mod loader;
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::{
    errors::PipelineBuildError,
    result::{ResultRequirement, TestResult},
    stages::{ExecutionEvent, ExecutionStage},
    summary::RunSummary,
    test_instance::{StageId, SubtestBuilder, TestInstance},
};
use loader::TestLoader;
use std::{collections::VecDeque, fmt, sync::Arc};
use tracing::{debug, info};

/// A node of the pipeline.
///
/// Every test a stage receives through [`next_test`](Self::next_test) must eventually be answered
/// with exactly one [`StageContext::send_result`] for that same test, unless the pipeline is
/// stopped first. A stage that replaces a test with subtests receives one result per subtest it
/// sent, and answers its own predecessor once it has no more subtests to offer.
pub trait Stage: fmt::Debug {
    /// A short name for the stage, used in subtest ids and logs.
    fn name(&self) -> &str;

    /// The least detail this stage needs in the results it receives.
    fn requirement(&self) -> ResultRequirement {
        ResultRequirement::DropResult
    }

    /// Returns true if this stage creates tests of its own.
    fn generates_tests(&self) -> bool {
        false
    }

    /// Returns true if this stage must see tests in the order the caller loaded them, i.e. it
    /// must be placed before every stage that generates tests.
    fn requires_loaded_order(&self) -> bool {
        false
    }

    /// Called once before the run with the requirement of everything upstream of this stage.
    fn setup(&mut self, _requirement: ResultRequirement) {}

    /// Receives a test from the predecessor.
    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>);

    /// Receives the result for a test this stage sent forward.
    ///
    /// The default passes the result through to the predecessor.
    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        cx.send_result(test, result);
    }

    /// Called when no result arrived within the heartbeat timeout.
    fn heartbeat(&mut self, _cx: &mut StageContext<'_>) {}

    /// Called once when the pipeline stops. Stages drop all bookkeeping for unfinished tests.
    fn stop(&mut self) {}
}

/// An action emitted by a stage.
#[derive(Debug)]
pub(crate) enum StageAction {
    SendTest(Arc<TestInstance>),
    SendResult(Arc<TestInstance>, Option<TestResult>),
    Stop(String),
}

/// The interface a stage uses to talk to the rest of the pipeline.
#[derive(Debug)]
pub struct StageContext<'a> {
    stage_id: StageId,
    stage_name: &'a str,
    stopped: bool,
    actions: &'a mut Vec<StageAction>,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        stage_id: StageId,
        stage_name: &'a str,
        stopped: bool,
        actions: &'a mut Vec<StageAction>,
    ) -> Self {
        Self {
            stage_id,
            stage_name,
            stopped,
            actions,
        }
    }

    /// Returns the id of the current stage.
    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    /// Sends a test to the successor.
    pub fn send_test(&mut self, test: Arc<TestInstance>) {
        self.actions.push(StageAction::SendTest(test));
    }

    /// Sends the result for `test` to the predecessor.
    pub fn send_result(&mut self, test: Arc<TestInstance>, result: Option<TestResult>) {
        self.actions.push(StageAction::SendResult(test, result));
    }

    /// Stops the whole pipeline. Idempotent.
    pub fn stop(&mut self, reason: impl Into<String>) {
        if !self.stopped {
            self.stopped = true;
            self.actions.push(StageAction::Stop(reason.into()));
        }
    }

    /// Returns true if the pipeline has been stopped, or a stop was requested in this call.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Starts building a subtest of `origin` produced by the current stage.
    pub fn subtest(&self, origin: &Arc<TestInstance>, suffix: impl fmt::Display) -> SubtestBuilder {
        SubtestBuilder::new(origin, self.stage_id, self.stage_name, &suffix.to_string())
    }

    /// Builds a root test produced by the current stage that runs `members` together.
    ///
    /// Returns `None` if `members` is empty.
    pub fn combined_test(
        &self,
        members: Vec<Arc<TestInstance>>,
        suffix: impl fmt::Display,
    ) -> Option<Arc<TestInstance>> {
        TestInstance::combined(self.stage_id, self.stage_name, &suffix.to_string(), members)
    }
}

/// An event reported to the caller of [`Pipeline::execute`].
#[derive(Debug)]
pub enum TestEvent<'a> {
    /// A root test was loaded into the pipeline.
    Loaded {
        /// The test.
        test: &'a Arc<TestInstance>,
    },

    /// The final result for a root test reached the head of the pipeline.
    Finished {
        /// The test.
        test: &'a Arc<TestInstance>,

        /// Its result, reduced to what the head asked for.
        result: Option<&'a TestResult>,
    },

    /// No result arrived within the heartbeat timeout.
    Heartbeat,

    /// The pipeline was stopped.
    Stopped {
        /// Why the pipeline was stopped.
        reason: &'a str,
    },
}

/// Builds a [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
    head_requirement: ResultRequirement,
    initial_batch_size: Option<usize>,
}

impl PipelineBuilder {
    /// The default number of root tests loaded before the first result arrives.
    pub const DEFAULT_INITIAL_BATCH_SIZE: usize = 200;

    /// Creates a new builder with no stages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends an already-boxed stage.
    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the requirement of whoever consumes results at the head of the pipeline, besides the
    /// run summary. The summary always asks for at least [`RunSummary::REQUIREMENT`].
    pub fn head_requirement(mut self, requirement: ResultRequirement) -> Self {
        self.head_requirement = requirement;
        self
    }

    /// Sets how many root tests are loaded before the first result arrives. After that, one more
    /// root test is loaded per root result.
    pub fn initial_batch_size(mut self, size: usize) -> Self {
        self.initial_batch_size = Some(size);
        self
    }

    /// Connects the stages to the terminal execution stage and runs setup.
    pub fn build(self, mut execution: ExecutionStage) -> Result<Pipeline, PipelineBuildError> {
        let initial_batch_size = self
            .initial_batch_size
            .unwrap_or(Self::DEFAULT_INITIAL_BATCH_SIZE);
        if initial_batch_size == 0 {
            return Err(PipelineBuildError::ZeroInitialBatch);
        }

        let mut first_producer: Option<&str> = None;
        for stage in &self.stages {
            if let Some(producer) = first_producer {
                if stage.requires_loaded_order() {
                    return Err(PipelineBuildError::FilterAfterProducer {
                        stage: stage.name().to_owned(),
                        producer: producer.to_owned(),
                    });
                }
            } else if stage.generates_tests() {
                first_producer = Some(stage.name());
            }
        }

        let mut stages = self.stages;
        let head_requirement = self.head_requirement.max(RunSummary::REQUIREMENT);
        let requirement = negotiate(head_requirement, &mut stages);
        debug!("negotiated result requirement for execution: {requirement:?}");
        execution.setup(requirement);

        let names = stages.iter().map(|stage| stage.name().to_owned()).collect();
        Ok(Pipeline {
            stages,
            names,
            execution,
            initial_batch_size,
            queue: VecDeque::new(),
            stop_reason: None,
        })
    }
}

/// Runs setup top-down, returning the requirement the execution stage must honor.
fn negotiate(head: ResultRequirement, stages: &mut [Box<dyn Stage>]) -> ResultRequirement {
    let mut requirement = head;
    for stage in stages {
        stage.setup(requirement);
        requirement = requirement.max(stage.requirement());
    }
    requirement
}

#[derive(Debug)]
enum Message {
    /// A test travelling forward. `to == stages.len()` is the execution stage.
    Test { to: usize, test: Arc<TestInstance> },

    /// A result travelling backward. `to == None` is the head.
    Result {
        to: Option<usize>,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
    },
}

/// A built pipeline, ready to run.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    names: Vec<String>,
    execution: ExecutionStage,
    initial_batch_size: usize,
    queue: VecDeque<Message>,
    stop_reason: Option<String>,
}

impl Pipeline {
    /// Returns the requirement negotiated for the execution stage.
    pub fn execution_requirement(&self) -> ResultRequirement {
        self.execution.requirement()
    }

    /// Runs `tests` through the pipeline, reporting events to `callback`.
    ///
    /// Returns the run summary once every loaded test has finished or the pipeline was stopped
    /// and drained. An internal pool error stops the pipeline and is recorded in the summary after
    /// shutdown.
    pub fn execute<I, F>(mut self, tests: I, mut callback: F) -> RunSummary
    where
        I: IntoIterator<Item = Arc<TestInstance>>,
        I::IntoIter: 'static,
        F: FnMut(TestEvent<'_>),
    {
        let mut head = Head {
            loader: TestLoader::new(tests.into_iter()),
            summary: RunSummary::default(),
            callback: &mut callback,
        };

        for _ in 0..self.initial_batch_size {
            if !self.load_next(&mut head) {
                break;
            }
        }
        self.drain(&mut head);

        let outcome = loop {
            let event = match self.execution.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => break Ok(()),
                Err(error) => {
                    self.stop("internal pool error".to_owned(), &mut head);
                    break Err(error);
                }
            };
            match event {
                ExecutionEvent::Heartbeat => {
                    for index in (0..self.stages.len()).rev() {
                        self.dispatch(index, &mut head, |stage, cx| stage.heartbeat(cx));
                    }
                    (head.callback)(TestEvent::Heartbeat);
                }
                ExecutionEvent::Finished { test, result } => {
                    self.queue.push_back(Message::Result {
                        to: self.stages.len().checked_sub(1),
                        test,
                        result,
                    });
                }
            }
            self.drain(&mut head);
        };

        let mut summary = head.summary;
        summary.set_stop_reason(self.stop_reason.take());
        let closed = self.execution.close();
        if let Err(error) = outcome.and(closed) {
            summary.set_internal_error(error);
        }
        summary
    }

    fn load_next<F: FnMut(TestEvent<'_>)>(&mut self, head: &mut Head<'_, F>) -> bool {
        let Some(test) = head.loader.next() else {
            return false;
        };
        head.summary.record_loaded();
        (head.callback)(TestEvent::Loaded { test: &test });
        self.queue.push_back(Message::Test { to: 0, test });
        true
    }

    fn drain<F: FnMut(TestEvent<'_>)>(&mut self, head: &mut Head<'_, F>) {
        while let Some(message) = self.queue.pop_front() {
            match message {
                Message::Test { to, test } => {
                    if self.stop_reason.is_some() {
                        debug!("dropping {test}: pipeline stopped");
                    } else if to == self.stages.len() {
                        self.execution.next_test(test);
                    } else {
                        self.dispatch(to, head, |stage, cx| stage.next_test(test, cx));
                    }
                }
                Message::Result {
                    to: Some(index),
                    test,
                    result,
                } => {
                    self.dispatch(index, head, |stage, cx| stage.result_for(test, result, cx));
                }
                Message::Result {
                    to: None,
                    test,
                    result,
                } => {
                    head.summary.record(&test, result.as_ref());
                    (head.callback)(TestEvent::Finished {
                        test: &test,
                        result: result.as_ref(),
                    });
                    if self.stop_reason.is_none() {
                        self.load_next(head);
                    }
                }
            }
        }
    }

    fn dispatch<F, G>(&mut self, index: usize, head: &mut Head<'_, F>, f: G)
    where
        F: FnMut(TestEvent<'_>),
        G: FnOnce(&mut dyn Stage, &mut StageContext<'_>),
    {
        let mut actions = Vec::new();
        {
            let mut cx = StageContext::new(
                StageId(index),
                &self.names[index],
                self.stop_reason.is_some(),
                &mut actions,
            );
            f(self.stages[index].as_mut(), &mut cx);
        }

        for action in actions {
            match action {
                StageAction::SendTest(test) => {
                    self.queue.push_back(Message::Test {
                        to: index + 1,
                        test,
                    });
                }
                StageAction::SendResult(test, result) => {
                    self.queue.push_back(Message::Result {
                        to: index.checked_sub(1),
                        test,
                        result,
                    });
                }
                StageAction::Stop(reason) => {
                    let reason = format!("{}: {reason}", self.names[index]);
                    self.stop(reason, head);
                }
            }
        }
    }

    fn stop<F: FnMut(TestEvent<'_>)>(&mut self, reason: String, head: &mut Head<'_, F>) {
        if self.stop_reason.is_some() {
            return;
        }
        info!("stopping pipeline ({reason})");
        for stage in &mut self.stages {
            stage.stop();
        }
        self.execution.stop();
        (head.callback)(TestEvent::Stopped { reason: &reason });
        self.stop_reason = Some(reason);
    }
}

struct Head<'a, F> {
    loader: TestLoader,
    summary: RunSummary,
    callback: &'a mut F,
}
