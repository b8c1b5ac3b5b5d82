// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::test_instance::TestInstance;
use debug_ignore::DebugIgnore;
use std::sync::Arc;

/// The head of the pipeline: pulls root tests lazily from the caller's iterator.
#[derive(Debug)]
pub(super) struct TestLoader {
    tests: DebugIgnore<Box<dyn Iterator<Item = Arc<TestInstance>>>>,
    exhausted: bool,
}

impl TestLoader {
    pub(super) fn new(tests: impl Iterator<Item = Arc<TestInstance>> + 'static) -> Self {
        Self {
            tests: DebugIgnore(Box::new(tests)),
            exhausted: false,
        }
    }

    /// Returns the next root test, or `None` once the iterator is exhausted.
    pub(super) fn next(&mut self) -> Option<Arc<TestInstance>> {
        if self.exhausted {
            return None;
        }
        let next = self.tests.next();
        self.exhausted = next.is_none();
        next
    }
}
