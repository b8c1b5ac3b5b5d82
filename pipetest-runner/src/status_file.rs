// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-parsed status-file expectations.
//!
//! The on-disk status file syntax is handled elsewhere. What reaches the pipeline is a plain
//! mapping from full test names (`suite/path`) to status entries, plus a parallel mapping from
//! name prefixes to entries. A test's effective entry is the union of its exact entry and every
//! prefix entry that matches it.

use crate::test_instance::{ExpectedOutcomes, TestAttributes, TestInstance};
use pipetest_metadata::{Outcome, OutcomeParseError};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Outcome keywords and extra flags attached to a test or a prefix of tests.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusEntry {
    keywords: BTreeSet<Outcome>,
    flags: Vec<String>,
}

impl StatusEntry {
    /// Creates an entry from keywords and flags.
    pub fn new(
        keywords: impl IntoIterator<Item = Outcome>,
        flags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            keywords: keywords.into_iter().collect(),
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses an entry from status tokens: `--` tokens are flags, everything else is a keyword.
    pub fn from_tokens<'a>(
        tokens: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, OutcomeParseError> {
        let mut entry = Self::default();
        for token in tokens {
            if token.starts_with("--") {
                entry.flags.push(token.to_owned());
            } else {
                entry.keywords.insert(token.parse()?);
            }
        }
        Ok(entry)
    }

    /// Returns the keywords in this entry.
    pub fn keywords(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.keywords.iter().copied()
    }

    /// Returns the flags in this entry.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    fn merge(&mut self, other: &StatusEntry) {
        self.keywords.extend(other.keywords.iter().copied());
        self.flags.extend(other.flags.iter().cloned());
    }
}

/// The expectations of one test, resolved from a [`StatusFile`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolvedStatus {
    /// The outcomes the test may produce.
    pub expected: ExpectedOutcomes,

    /// Scheduling attributes.
    pub attributes: TestAttributes,

    /// Extra flags the test runs with.
    pub flags: Vec<String>,
}

impl ResolvedStatus {
    fn from_entry(entry: StatusEntry) -> Self {
        let has = |outcome| entry.keywords.contains(&outcome);
        let attributes = TestAttributes {
            skip: has(Outcome::Skip),
            slow: has(Outcome::Slow),
            heavy: has(Outcome::Heavy),
            pass_or_fail: has(Outcome::Pass) && (has(Outcome::Fail) || has(Outcome::FailOk)),
        };
        Self {
            expected: ExpectedOutcomes::new(entry.keywords.iter().copied()),
            attributes,
            flags: entry.flags,
        }
    }
}

/// Expectations for a whole run.
#[derive(Clone, Debug, Default)]
pub struct StatusFile {
    rules: HashMap<String, StatusEntry>,
    // Sorted so that flags from several matching prefixes are applied in a stable order.
    prefix_rules: BTreeMap<String, StatusEntry>,
}

impl StatusFile {
    /// Creates an empty status file: every test is expected to pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a status file from exact and prefix mappings.
    pub fn from_maps(
        rules: impl IntoIterator<Item = (String, StatusEntry)>,
        prefix_rules: impl IntoIterator<Item = (String, StatusEntry)>,
    ) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            prefix_rules: prefix_rules.into_iter().collect(),
        }
    }

    /// Adds an entry for the test called `full_name`, merging with any existing entry.
    pub fn add_rule(&mut self, full_name: impl Into<String>, entry: StatusEntry) {
        self.rules.entry(full_name.into()).or_default().merge(&entry);
    }

    /// Adds an entry for every test whose full name starts with `prefix`.
    pub fn add_prefix_rule(&mut self, prefix: impl Into<String>, entry: StatusEntry) {
        self.prefix_rules
            .entry(prefix.into())
            .or_default()
            .merge(&entry);
    }

    /// Resolves the expectations of the test called `full_name`.
    pub fn resolve(&self, full_name: &str) -> ResolvedStatus {
        let mut entry = self.rules.get(full_name).cloned().unwrap_or_default();
        for (prefix, prefix_entry) in &self.prefix_rules {
            if full_name.starts_with(prefix.as_str()) {
                entry.merge(prefix_entry);
            }
        }
        ResolvedStatus::from_entry(entry)
    }

    /// Creates a root test with its expectations resolved from this file.
    pub fn load_test(&self, suite: &str, path: &str) -> TestInstance {
        let test = TestInstance::new(suite, path);
        let status = self.resolve(&test.full_name());
        test.with_status(status)
    }
}
