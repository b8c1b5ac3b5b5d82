// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::TestInstance,
};
use indexmap::IndexMap;
use rand::{Rng, SeedableRng, seq::index};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;
use tracing::debug;

/// Computes the key under which a test may be combined with others, or `None` if it may not be
/// combined at all.
pub type CombineKeyFn = fn(&TestInstance) -> Option<String>;

/// Tests are combinable if they are only expected to pass and are neither slow nor heavy. Tests
/// combine with others from the same suite that run with the same flags.
pub fn default_combine_key(test: &TestInstance) -> Option<String> {
    let attributes = test.attributes();
    if !test.expected().is_pass_only() || attributes.slow || attributes.heavy {
        return None;
    }
    Some(format!("{}|{}", test.suite(), test.flags().join(" ")))
}

/// Runs random samples of already-seen tests together as one combined test.
///
/// Every test this stage receives is answered immediately with no result and remembered under its
/// combine key. Combined tests are generated while fewer than `parallel` of them are in flight and
/// fewer than `count` have been generated. Each one runs a random sample of between `min_size`
/// and `max_size` tests from one group. No combined test is generated until some group has at
/// least `min_size` tests.
#[derive(Debug)]
pub struct CombinerProducer {
    min_size: usize,
    max_size: usize,
    count: usize,
    parallel: usize,
    key: CombineKeyFn,
    rng: Xoshiro256PlusPlus,
    groups: IndexMap<String, Vec<Arc<TestInstance>>>,
    generated: usize,
    in_flight: usize,
}

impl CombinerProducer {
    /// Creates a combiner that generates `count` combined tests of `min_size..=max_size` members.
    pub fn new(min_size: usize, max_size: usize, count: usize) -> Self {
        let min_size = min_size.max(1);
        Self {
            min_size,
            max_size: max_size.max(min_size),
            count,
            parallel: 1,
            key: default_combine_key,
            rng: Xoshiro256PlusPlus::seed_from_u64(rand::random()),
            groups: IndexMap::new(),
            generated: 0,
            in_flight: 0,
        }
    }

    /// Sets how many combined tests may be in flight at once.
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self
    }

    /// Replaces the combine key.
    pub fn with_key(mut self, key: CombineKeyFn) -> Self {
        self.key = key;
        self
    }

    /// Seeds the sampling generator, for reproducible runs.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    /// Returns the number of combined tests generated so far.
    pub fn generated(&self) -> usize {
        self.generated
    }

    fn sample(&mut self) -> Option<Vec<Arc<TestInstance>>> {
        let eligible: Vec<usize> = self
            .groups
            .values()
            .enumerate()
            .filter(|(_, tests)| tests.len() >= self.min_size)
            .map(|(index, _)| index)
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let group_index = eligible[self.rng.gen_range(0..eligible.len())];
        let (_, tests) = self.groups.get_index(group_index)?;
        let size = self
            .rng
            .gen_range(self.min_size..=self.max_size.min(tests.len()));
        let members = index::sample(&mut self.rng, tests.len(), size)
            .into_iter()
            .map(|member| Arc::clone(&tests[member]))
            .collect();
        Some(members)
    }

    fn generate(&mut self, cx: &mut StageContext<'_>) {
        while !cx.is_stopped() && self.in_flight < self.parallel && self.generated < self.count {
            let Some(members) = self.sample() else {
                debug!("not enough tests seen yet to combine");
                return;
            };
            let Some(combined) = cx.combined_test(members, self.generated) else {
                return;
            };
            self.generated += 1;
            self.in_flight += 1;
            cx.send_test(combined);
        }
    }
}

impl Stage for CombinerProducer {
    fn name(&self) -> &str {
        "combined"
    }

    fn generates_tests(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        if let Some(key) = (self.key)(&test) {
            self.groups.entry(key).or_default().push(Arc::clone(&test));
        }
        cx.send_result(test, None);
        self.generate(cx);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        if test.producer() != Some(cx.stage_id()) {
            cx.send_result(test, result);
            return;
        }
        if result.as_ref().is_some_and(TestResult::has_unexpected_output) {
            debug!("combined test {test} failed: {}", test.paths().join(" "));
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        self.generate(cx);
    }

    fn stop(&mut self) {
        self.groups.clear();
        self.in_flight = 0;
    }
}
