// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    classifier::{OutputClassifier, default_classifier},
    errors::{JobError, PoolError},
    pool::{ExecutionPool, JobId, PoolEvent, PoolHandle, PoolJob, WorkerContext},
    result::{ResultRequirement, SingleResult, TestResult},
    test_command::{CommandBuilder, CommandContext, DefaultCommandBuilder, TestCommand},
    test_instance::{ExpectedOutcomes, TestInstance},
};
use debug_ignore::DebugIgnore;
use pipetest_metadata::RunStatus;
use std::{collections::HashMap, error::Error, fmt::Write as _, sync::Arc, time::Duration};
use tracing::debug;

/// The terminal node of the pipeline: runs tests as OS processes on an [`ExecutionPool`].
#[derive(Debug)]
pub struct ExecutionStage {
    pool: DebugIgnore<ExecutionPool<ExecutionJob>>,
    builder: Arc<dyn CommandBuilder>,
    context: CommandContext,
    classifiers: HashMap<String, Arc<dyn OutputClassifier>>,
    requirement: ResultRequirement,
    in_flight: HashMap<JobId, (Arc<TestInstance>, TestCommand)>,
}

impl ExecutionStage {
    /// Starts a pool of `test_threads` workers and uses the [`DefaultCommandBuilder`].
    pub fn new(
        test_threads: usize,
        heartbeat_timeout: Duration,
        context: CommandContext,
    ) -> Result<Self, PoolError> {
        let pool = ExecutionPool::new(test_threads, heartbeat_timeout)?
            .with_grace_period(context.grace_period);
        Ok(Self {
            pool: DebugIgnore(pool),
            builder: Arc::new(DefaultCommandBuilder),
            context,
            classifiers: HashMap::new(),
            requirement: ResultRequirement::DropResult,
            in_flight: HashMap::new(),
        })
    }

    /// Replaces the command builder.
    pub fn with_command_builder(mut self, builder: impl CommandBuilder + 'static) -> Self {
        self.builder = Arc::new(builder);
        self
    }

    /// Uses `classifier` for every test in `suite`.
    pub fn with_classifier(
        mut self,
        suite: impl Into<String>,
        classifier: impl OutputClassifier + 'static,
    ) -> Self {
        self.classifiers.insert(suite.into(), Arc::new(classifier));
        self
    }

    /// Returns the requirement negotiated during setup.
    pub fn requirement(&self) -> ResultRequirement {
        self.requirement
    }

    /// Returns a handle that can abort the pool from another thread.
    pub fn pool_handle(&self) -> PoolHandle {
        self.pool.handle()
    }

    pub(crate) fn setup(&mut self, requirement: ResultRequirement) {
        self.requirement = requirement;
    }

    pub(crate) fn next_test(&mut self, test: Arc<TestInstance>) {
        let command = self.builder.build(&test, &self.context);
        let classifier = self
            .classifiers
            .get(test.suite())
            .cloned()
            .unwrap_or_else(|| default_classifier(test.expected()));
        let job = ExecutionJob {
            command: command.clone(),
            expected: test.expected().clone(),
            classifier,
            requirement: self.requirement,
            keep_output: test.keep_output(),
        };
        let job_id = self.pool.submit(job);
        debug!("submitted {test} as {job_id}: `{command}`");
        self.in_flight.insert(job_id, (test, command));
    }

    pub(crate) fn next_event(&mut self) -> Result<Option<ExecutionEvent>, PoolError> {
        let event = match self.pool.next_event()? {
            Some(PoolEvent::Heartbeat) => ExecutionEvent::Heartbeat,
            Some(PoolEvent::Completed { job_id, outcome }) => {
                let Some((test, command)) = self.in_flight.remove(&job_id) else {
                    debug!("ignoring outcome for unknown {job_id}");
                    return Ok(Some(ExecutionEvent::Heartbeat));
                };
                let result = match outcome {
                    Ok(single) => single.map(TestResult::Single),
                    Err(error) => Some(TestResult::Single(exec_failure(&test, command, &error))),
                };
                ExecutionEvent::Finished { test, result }
            }
            None => return Ok(None),
        };
        Ok(Some(event))
    }

    pub(crate) fn stop(&mut self) {
        self.pool.abort();
        self.in_flight.clear();
    }

    pub(crate) fn close(self) -> Result<(), PoolError> {
        self.pool.0.close()
    }
}

/// An event produced by the execution stage for the coordinator.
#[derive(Debug)]
pub(crate) enum ExecutionEvent {
    Heartbeat,
    Finished {
        test: Arc<TestInstance>,
        result: Option<TestResult>,
    },
}

fn exec_failure(test: &TestInstance, command: TestCommand, error: &JobError) -> SingleResult {
    let mut details = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(details, "\n  caused by: {cause}");
        source = cause.source();
    }
    debug!("{test} failed to execute: {details}");
    SingleResult {
        has_unexpected_output: true,
        status: RunStatus::Fail,
        output: None,
        command: Some(command),
        error_details: Some(details),
    }
}

/// One concrete run of a test on a pool worker.
#[derive(Debug)]
pub(crate) struct ExecutionJob {
    command: TestCommand,
    expected: ExpectedOutcomes,
    classifier: Arc<dyn OutputClassifier>,
    requirement: ResultRequirement,
    keep_output: bool,
}

impl PoolJob for ExecutionJob {
    type Output = Option<SingleResult>;

    fn run(self, cx: &WorkerContext) -> Result<Self::Output, JobError> {
        let output = self.command.run(cx)?;
        let verdict = self.classifier.classify(&output, &self.expected);
        let result = SingleResult {
            has_unexpected_output: verdict.has_unexpected_output,
            status: verdict.status,
            output: Some(output),
            command: Some(self.command),
            error_details: None,
        };
        if self.keep_output {
            Ok(Some(result))
        } else {
            Ok(self.requirement.reduce(result))
        }
    }
}
