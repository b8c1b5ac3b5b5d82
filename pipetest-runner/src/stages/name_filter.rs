// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::NameFilterBuildError,
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::TestInstance,
};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::{collections::HashSet, sync::Arc};

/// Keeps tests whose full name (`suite/path`) or suite matches one of a set of names.
///
/// Patterns containing `*`, `?` or `[` are globs; everything else must match exactly. `*` matches
/// across `/`. An empty filter keeps every test.
#[derive(Clone, Debug)]
pub struct NameFilter {
    exact: HashSet<String>,
    globs: GlobSet,
    glob_count: usize,
}

impl NameFilter {
    /// Builds a filter from `patterns`.
    pub fn new(
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, NameFilterBuildError> {
        let mut exact = HashSet::new();
        let mut builder = GlobSetBuilder::new();
        let mut glob_count = 0;
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.contains(['*', '?', '[']) {
                let glob = GlobBuilder::new(pattern)
                    .literal_separator(false)
                    .build()
                    .map_err(|err| NameFilterBuildError::new(pattern, err))?;
                builder.add(glob);
                glob_count += 1;
            } else {
                exact.insert(pattern.trim_end_matches('/').to_owned());
            }
        }
        let globs = builder
            .build()
            .map_err(|err| NameFilterBuildError::new("<set>", err))?;
        Ok(Self {
            exact,
            globs,
            glob_count,
        })
    }

    /// Returns true if the filter keeps every test.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.glob_count == 0
    }

    /// Returns true if `test` matches the filter.
    pub fn matches(&self, test: &TestInstance) -> bool {
        if self.is_empty() {
            return true;
        }
        let root = test.root();
        let full_name = root.full_name();
        self.exact.contains(&full_name)
            || self.exact.contains(root.suite())
            || self.globs.is_match(&full_name)
    }
}

impl Stage for NameFilter {
    fn name(&self) -> &str {
        "name-filter"
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        if self.matches(&test) {
            cx.send_test(test);
        } else {
            cx.send_result(test, Some(TestResult::Skipped));
        }
    }
}
