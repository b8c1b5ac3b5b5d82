// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::{ProcedureId, TestInstance},
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Runs every test several times with different random seeds.
///
/// Seeds are nonzero. The predecessor receives no result once every seed has run.
#[derive(Debug)]
pub struct SeedProducer {
    count: usize,
    parallel_subtests: usize,
    fixed_seed: Option<i32>,
    rng: Xoshiro256PlusPlus,
    pending: HashMap<ProcedureId, SeedState>,
}

#[derive(Debug)]
struct SeedState {
    origin: Arc<TestInstance>,
    sent: usize,
    in_flight: usize,
}

impl SeedProducer {
    /// Creates a producer that runs each test `count` times (0 for no limit), with up to
    /// `parallel_subtests` runs of one test in flight at once.
    pub fn new(count: usize, parallel_subtests: usize) -> Self {
        Self {
            count,
            parallel_subtests: parallel_subtests.max(1),
            fixed_seed: None,
            rng: Xoshiro256PlusPlus::seed_from_u64(rand::random()),
            pending: HashMap::new(),
        }
    }

    /// Uses `seed` for every subtest instead of a random one.
    pub fn with_fixed_seed(mut self, seed: i32) -> Self {
        self.fixed_seed = Some(seed);
        self
    }

    /// Seeds the generator that picks per-subtest seeds, for reproducible runs.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    /// Returns the number of tests with subtests still to run or in flight.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn has_more(&self, state: &SeedState) -> bool {
        self.count == 0 || state.sent < self.count
    }

    fn next_seed(&mut self) -> i32 {
        if let Some(seed) = self.fixed_seed {
            return seed;
        }
        loop {
            let seed = self.rng.gen_range(i32::MIN..=i32::MAX);
            if seed != 0 {
                return seed;
            }
        }
    }

    fn send_next(&mut self, state: &mut SeedState, cx: &mut StageContext<'_>) {
        let seed = self.next_seed();
        let subtest = cx
            .subtest(&state.origin, state.sent)
            .random_seed(seed)
            .build();
        state.sent += 1;
        state.in_flight += 1;
        cx.send_test(subtest);
    }
}

impl Stage for SeedProducer {
    fn name(&self) -> &str {
        "seed"
    }

    fn generates_tests(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        let mut state = SeedState {
            origin: test,
            sent: 0,
            in_flight: 0,
        };
        while state.in_flight < self.parallel_subtests && self.has_more(&state) {
            self.send_next(&mut state, cx);
        }
        self.pending.insert(state.origin.procid().clone(), state);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        _result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        let Some(origin) = test.origin() else {
            cx.send_result(test, None);
            return;
        };
        let Some(mut state) = self.pending.remove(origin.procid()) else {
            debug!("{test}: result after its seeds were abandoned");
            return;
        };
        state.in_flight -= 1;
        if !cx.is_stopped() && self.has_more(&state) {
            self.send_next(&mut state, cx);
        }
        if state.in_flight == 0 {
            cx.send_result(state.origin, None);
        } else {
            self.pending.insert(state.origin.procid().clone(), state);
        }
    }

    fn stop(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_helpers::{StageHarness, passed, root};

    #[test]
    fn bounded_count_runs_in_parallel() {
        let mut harness = StageHarness::new(SeedProducer::new(3, 2).with_rng_seed(7));
        harness.next_test(root("a.js"));

        let first = harness.take_tests();
        assert_eq!(first.len(), 2, "two subtests in flight at once");
        for subtest in &first {
            assert!(subtest.random_seed().is_some_and(|seed| seed != 0));
        }

        harness.result_for(Arc::clone(&first[0]), passed());
        let third = harness.take_tests();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].procid().as_str(), "suite/a.js/seed-2");

        harness.result_for(Arc::clone(&first[1]), passed());
        assert!(harness.take_tests().is_empty());
        assert!(harness.take_results().is_empty(), "one subtest still in flight");

        harness.result_for(Arc::clone(&third[0]), passed());
        let results = harness.take_results();
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_none());
        assert_eq!(harness.stage.pending(), 0);
    }

    #[test]
    fn fixed_seed_is_used_for_every_subtest() {
        let mut harness = StageHarness::new(SeedProducer::new(2, 2).with_fixed_seed(42));
        harness.next_test(root("a.js"));
        let seeds: Vec<_> = harness
            .take_tests()
            .iter()
            .map(|test| test.random_seed())
            .collect();
        assert_eq!(seeds, [Some(42), Some(42)]);
    }

    #[test]
    fn unbounded_count_yields_one_subtest_per_result_until_stopped() {
        const RESULTS: usize = 5;
        let mut harness = StageHarness::new(SeedProducer::new(0, 1));
        harness.next_test(root("a.js"));

        let mut yielded = 0;
        for received in 1..=RESULTS {
            let subtest = harness.take_tests().remove(0);
            yielded += 1;
            if received == RESULTS {
                // A downstream stage stops the pipeline before this result reaches the producer.
                harness.stop();
            }
            harness.result_for(subtest, passed());
        }

        assert_eq!(yielded, RESULTS);
        assert!(harness.take_tests().is_empty());
        assert_eq!(harness.stage.pending(), 0);
    }
}
