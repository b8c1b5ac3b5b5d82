// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests and subtests as they flow through the pipeline.
//!
//! A [`TestInstance`] is immutable once built and is shared as an `Arc`. Root tests are created by
//! the caller (usually from a suite listing plus a [`StatusFile`](crate::status_file::StatusFile));
//! subtests are derived from an origin test by a producer stage through a [`SubtestBuilder`]. Every
//! subtest remembers its origin and the stage that produced it, so its origin chain always ends at
//! a root test.

use crate::status_file::ResolvedStatus;
use pipetest_metadata::Outcome;
use std::{borrow::Borrow, collections::BTreeSet, fmt, sync::Arc};

/// A unique identifier for a test or subtest within a pipeline run.
///
/// A root test's id is `suite/path`. A subtest's id is `<origin id>/<stage name>-<suffix>`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProcedureId(String);

impl ProcedureId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ProcedureId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The position of a stage within a pipeline.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StageId(pub(crate) usize);

impl StageId {
    /// Returns the zero-based index of the stage, counted from the head of the pipeline.
    pub fn index(self) -> usize {
        self.0
    }
}

/// The set of outcomes a test is allowed to produce when it runs.
///
/// Only runtime outcomes are stored: `FAIL_OK` is folded into `FAIL`, and scheduling attributes
/// such as `SLOW` are not outcomes at all. An empty input resolves to `PASS`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ExpectedOutcomes {
    outcomes: BTreeSet<Outcome>,
}

impl ExpectedOutcomes {
    /// Returns the default expectation: the test must pass.
    pub fn pass_only() -> Self {
        Self {
            outcomes: [Outcome::Pass].into_iter().collect(),
        }
    }

    /// Creates a new set from status keywords.
    pub fn new(keywords: impl IntoIterator<Item = Outcome>) -> Self {
        let outcomes: BTreeSet<_> = keywords
            .into_iter()
            .filter_map(Outcome::runtime_outcome)
            .collect();
        if outcomes.is_empty() {
            Self::pass_only()
        } else {
            Self { outcomes }
        }
    }

    /// Returns true if the only acceptable outcome is `PASS`.
    pub fn is_pass_only(&self) -> bool {
        self.outcomes.len() == 1 && self.outcomes.contains(&Outcome::Pass)
    }

    /// Returns true if `outcome` is acceptable.
    pub fn contains(&self, outcome: Outcome) -> bool {
        self.outcomes.contains(&outcome)
    }

    /// Returns a copy of this set that also accepts `TIMEOUT`.
    pub fn with_timeout(&self) -> Self {
        let mut outcomes = self.outcomes.clone();
        outcomes.insert(Outcome::Timeout);
        Self { outcomes }
    }

    /// Iterates over the acceptable outcomes in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.outcomes.iter().copied()
    }
}

impl Default for ExpectedOutcomes {
    fn default() -> Self {
        Self::pass_only()
    }
}

impl fmt::Display for ExpectedOutcomes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for outcome in &self.outcomes {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{outcome}")?;
        }
        Ok(())
    }
}

/// Scheduling attributes resolved once from the status file.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TestAttributes {
    /// The test must not run at all.
    pub skip: bool,

    /// The test is slow: its timeout is extended.
    pub slow: bool,

    /// The test is resource-intensive.
    pub heavy: bool,

    /// The test may either pass or fail (it is flaky).
    pub pass_or_fail: bool,
}

/// A test or subtest.
#[derive(Clone, Debug)]
pub struct TestInstance {
    procid: ProcedureId,
    suite: String,
    path: String,
    expected: ExpectedOutcomes,
    attributes: TestAttributes,
    flags: Vec<String>,
    random_seed: Option<i32>,
    keep_output: bool,
    origin: Option<Arc<TestInstance>>,
    producer: Option<StageId>,
    members: Vec<Arc<TestInstance>>,
}

impl TestInstance {
    /// Creates a new root test that is expected to pass.
    pub fn new(suite: impl Into<String>, path: impl Into<String>) -> Self {
        let suite = suite.into();
        let path = path.into();
        Self {
            procid: ProcedureId(format!("{suite}/{path}")),
            suite,
            path,
            expected: ExpectedOutcomes::pass_only(),
            attributes: TestAttributes::default(),
            flags: Vec::new(),
            random_seed: None,
            keep_output: false,
            origin: None,
            producer: None,
            members: Vec::new(),
        }
    }

    /// Applies a resolved status-file entry: expectations, attributes and extra flags.
    pub fn with_status(mut self, status: ResolvedStatus) -> Self {
        self.expected = status.expected;
        self.attributes = status.attributes;
        self.flags.extend(status.flags);
        self
    }

    /// Sets the expected outcomes for this test.
    pub fn with_expected(mut self, expected: ExpectedOutcomes) -> Self {
        self.expected = expected;
        self
    }

    /// Sets the scheduling attributes for this test.
    pub fn with_attributes(mut self, attributes: TestAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Appends extra command-line flags.
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Fixes the random seed the test runs with.
    pub fn with_random_seed(mut self, seed: i32) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Builds a combined test that runs `members` together.
    ///
    /// Combined tests are roots: they have no origin, but they do have a producer.
    pub(crate) fn combined(
        producer: StageId,
        stage_name: &str,
        suffix: &str,
        members: Vec<Arc<TestInstance>>,
    ) -> Option<Arc<Self>> {
        let first = members.first()?;
        Some(Arc::new(Self {
            procid: ProcedureId(format!("{}/{stage_name}-{suffix}", first.suite)),
            suite: first.suite.clone(),
            path: first.path.clone(),
            expected: first.expected.clone(),
            attributes: first.attributes,
            flags: first.flags.clone(),
            random_seed: None,
            keep_output: false,
            origin: None,
            producer: Some(producer),
            members,
        }))
    }

    /// Returns the procedure id.
    pub fn procid(&self) -> &ProcedureId {
        &self.procid
    }

    /// Returns the suite this test belongs to.
    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// Returns the path of the test relative to its suite.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `suite/path`: the name status files and filters match against.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.suite, self.path)
    }

    /// Returns the paths this test runs. For a combined test, this is every member's path.
    pub fn paths(&self) -> Vec<&str> {
        if self.members.is_empty() {
            vec![self.path.as_str()]
        } else {
            self.members.iter().map(|m| m.path.as_str()).collect()
        }
    }

    /// Returns the outcomes this test may produce.
    pub fn expected(&self) -> &ExpectedOutcomes {
        &self.expected
    }

    /// Returns the scheduling attributes.
    pub fn attributes(&self) -> TestAttributes {
        self.attributes
    }

    /// Returns the extra flags this test runs with.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Returns the fixed random seed, if any.
    pub fn random_seed(&self) -> Option<i32> {
        self.random_seed
    }

    /// Returns true if the full output of this test must survive result reduction.
    pub fn keep_output(&self) -> bool {
        self.keep_output
    }

    /// Returns the test this one was derived from.
    pub fn origin(&self) -> Option<&Arc<TestInstance>> {
        self.origin.as_ref()
    }

    /// Returns the stage that produced this test, or `None` for tests created by the caller.
    pub fn producer(&self) -> Option<StageId> {
        self.producer
    }

    /// Returns the tests a combined test runs together.
    pub fn members(&self) -> &[Arc<TestInstance>] {
        &self.members
    }

    /// Returns true if this test has no origin.
    pub fn is_root(&self) -> bool {
        self.origin.is_none()
    }

    /// Walks the origin chain to the root test.
    pub fn root(&self) -> &TestInstance {
        let mut current = self;
        while let Some(origin) = &current.origin {
            current = origin;
        }
        current
    }
}

impl fmt::Display for TestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.procid)
    }
}

/// Derives a subtest from an origin test.
///
/// Obtained from [`StageContext::subtest`](crate::pipeline::StageContext::subtest). The subtest
/// starts out as a copy of its origin's attributes.
#[derive(Debug)]
#[must_use = "a subtest builder does nothing until built"]
pub struct SubtestBuilder {
    inner: TestInstance,
}

impl SubtestBuilder {
    pub(crate) fn new(
        origin: &Arc<TestInstance>,
        producer: StageId,
        stage_name: &str,
        suffix: &str,
    ) -> Self {
        let inner = TestInstance {
            procid: ProcedureId(format!("{}/{stage_name}-{suffix}", origin.procid)),
            suite: origin.suite.clone(),
            path: origin.path.clone(),
            expected: origin.expected.clone(),
            attributes: origin.attributes,
            flags: origin.flags.clone(),
            random_seed: origin.random_seed,
            keep_output: origin.keep_output,
            origin: Some(Arc::clone(origin)),
            producer: Some(producer),
            members: origin.members.clone(),
        };
        Self { inner }
    }

    /// Appends flags after the origin's flags.
    pub fn extend_flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Sets the random seed.
    pub fn random_seed(mut self, seed: i32) -> Self {
        self.inner.random_seed = Some(seed);
        self
    }

    /// Requires the full output of this subtest to be retained.
    pub fn keep_output(mut self) -> Self {
        self.inner.keep_output = true;
        self
    }

    /// Replaces the expected outcomes.
    pub fn expected(mut self, expected: ExpectedOutcomes) -> Self {
        self.inner.expected = expected;
        self
    }

    /// Finishes building the subtest.
    pub fn build(self) -> Arc<TestInstance> {
        Arc::new(self.inner)
    }
}
