// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    partition::{Partitioner, PartitionerBuilder},
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::TestInstance,
};
use std::sync::Arc;

/// Keeps only the tests that belong to one shard.
///
/// Must be placed before every stage that generates tests, so that the same input always selects
/// the same tests.
#[derive(Debug)]
pub struct ShardFilter {
    builder: PartitionerBuilder,
    partitioner: Box<dyn Partitioner>,
}

impl ShardFilter {
    /// Creates a filter for the shard `builder` describes.
    pub fn new(builder: PartitionerBuilder) -> Self {
        Self {
            partitioner: builder.build(),
            builder,
        }
    }

    /// Returns the shard this filter selects.
    pub fn builder(&self) -> PartitionerBuilder {
        self.builder
    }
}

impl Stage for ShardFilter {
    fn name(&self) -> &str {
        "shard"
    }

    fn requires_loaded_order(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        if self.partitioner.test_matches(&test.full_name()) {
            cx.send_test(test);
        } else {
            cx.send_result(test, Some(TestResult::Skipped));
        }
    }
}
