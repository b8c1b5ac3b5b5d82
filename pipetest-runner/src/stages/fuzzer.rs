// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::TestResult,
    test_instance::{ProcedureId, TestInstance},
};
use indexmap::IndexMap;
use itertools::Itertools;
use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use regex::Regex;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock},
};
use tracing::{debug, warn};

/// Values mined from the output of an analysis run.
///
/// An analysis run prints lines of the form `### <key> = <value>` to stdout.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AnalysisResult {
    values: IndexMap<String, u64>,
}

static ANALYSIS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^###\s*([A-Za-z0-9_.-]+)\s*=\s*(\d+)\s*$")
        .expect("analysis line regex is valid")
});

impl AnalysisResult {
    /// Parses every analysis line in `stdout`. Later lines win.
    pub fn parse(stdout: &str) -> Self {
        let values = ANALYSIS_LINE
            .captures_iter(stdout)
            .filter_map(|captures| {
                let value = captures[2].parse().ok()?;
                Some((captures[1].to_owned(), value))
            })
            .collect();
        Self { values }
    }

    /// Returns the value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.get(key).copied()
    }

    /// Returns true if no values were recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One independent way of generating fuzz flags.
pub trait FuzzStrategy: fmt::Debug {
    /// Flags the analysis run needs for this strategy. Empty if the strategy needs no analysis.
    fn analysis_flags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Returns true if this strategy can fuzz a test with the given analysis.
    fn is_applicable(&self, _analysis: &AnalysisResult) -> bool {
        true
    }

    /// Generates flags for one fuzz run.
    fn create_flags(&self, rng: &mut dyn RngCore, analysis: &AnalysisResult) -> Vec<String>;
}

/// Picks a value for `--<flag>` in `1..=N`, where `N` is read from an analysis run.
#[derive(Clone, Debug)]
pub struct IntervalFuzzer {
    analysis_flag: String,
    marker: String,
    flag: String,
}

impl IntervalFuzzer {
    /// Runs the analysis with `analysis_flag` and reads the upper bound from the `marker` line.
    pub fn new(
        analysis_flag: impl Into<String>,
        marker: impl Into<String>,
        flag: impl Into<String>,
    ) -> Self {
        Self {
            analysis_flag: analysis_flag.into(),
            marker: marker.into(),
            flag: flag.into(),
        }
    }
}

impl FuzzStrategy for IntervalFuzzer {
    fn analysis_flags(&self) -> Vec<String> {
        vec![self.analysis_flag.clone()]
    }

    fn is_applicable(&self, analysis: &AnalysisResult) -> bool {
        analysis.get(&self.marker).is_some_and(|max| max > 0)
    }

    fn create_flags(&self, rng: &mut dyn RngCore, analysis: &AnalysisResult) -> Vec<String> {
        match analysis.get(&self.marker) {
            Some(max) if max > 0 => vec![format!("--{}={}", self.flag, rng.gen_range(1..=max))],
            _ => Vec::new(),
        }
    }
}

/// Picks a value for `--<flag>` in a fixed inclusive range.
#[derive(Clone, Debug)]
pub struct RangeFuzzer {
    flag: String,
    min: u64,
    max: u64,
}

impl RangeFuzzer {
    /// Creates a new range fuzzer. The bounds are swapped if `min > max`.
    pub fn new(flag: impl Into<String>, min: u64, max: u64) -> Self {
        Self {
            flag: flag.into(),
            min: min.min(max),
            max: min.max(max),
        }
    }
}

impl FuzzStrategy for RangeFuzzer {
    fn create_flags(&self, rng: &mut dyn RngCore, _analysis: &AnalysisResult) -> Vec<String> {
        vec![format!("--{}={}", self.flag, rng.gen_range(self.min..=self.max))]
    }
}

/// Always yields the same flags.
#[derive(Clone, Debug)]
pub struct ToggleFuzzer {
    flags: Vec<String>,
}

impl ToggleFuzzer {
    /// Creates a new toggle fuzzer.
    pub fn new(flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }
}

impl FuzzStrategy for ToggleFuzzer {
    fn create_flags(&self, _rng: &mut dyn RngCore, _analysis: &AnalysisResult) -> Vec<String> {
        self.flags.clone()
    }
}

#[derive(Debug)]
struct WeightedStrategy {
    probability: f64,
    strategy: Box<dyn FuzzStrategy>,
}

/// Runs every test with randomly generated flags.
///
/// If any configured strategy needs it, an analysis subtest runs first with its output retained.
/// The analysis result selects which strategies apply. Each fuzz subtest then blends the
/// applicable strategies, including each with its configured probability, until at least one
/// flag was produced. A test no strategy applies to yields no fuzz subtests.
#[derive(Debug)]
pub struct FuzzerProducer {
    strategies: Vec<WeightedStrategy>,
    count: usize,
    rng: Xoshiro256PlusPlus,
    pending: HashMap<ProcedureId, FuzzState>,
}

#[derive(Debug)]
struct FuzzState {
    origin: Arc<TestInstance>,
    analysis: Option<AnalysisResult>,
    applicable: Vec<usize>,
    sent: usize,
}

impl FuzzerProducer {
    /// Blending stops after this many attempts that produced no flags.
    pub const MAX_BLEND_ATTEMPTS: usize = 16;

    /// Creates a producer that runs `count` fuzz subtests per test.
    pub fn new(count: usize) -> Self {
        Self {
            strategies: Vec::new(),
            count,
            rng: Xoshiro256PlusPlus::seed_from_u64(rand::random()),
            pending: HashMap::new(),
        }
    }

    /// Adds a strategy that is included in a fuzz run with `probability` (clamped to `0..=1`).
    pub fn with_strategy(mut self, probability: f64, strategy: impl FuzzStrategy + 'static) -> Self {
        self.strategies.push(WeightedStrategy {
            probability: if probability.is_nan() {
                0.0
            } else {
                probability.clamp(0.0, 1.0)
            },
            strategy: Box::new(strategy),
        });
        self
    }

    /// Seeds the flag generator, for reproducible runs.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    /// Returns the number of tests still being analyzed or fuzzed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn analysis_flags(&self) -> Vec<String> {
        self.strategies
            .iter()
            .flat_map(|weighted| weighted.strategy.analysis_flags())
            .unique()
            .collect()
    }

    fn blend_flags(&mut self, applicable: &[usize], analysis: &AnalysisResult) -> Vec<String> {
        for _ in 0..Self::MAX_BLEND_ATTEMPTS {
            let mut flags = Vec::new();
            for &index in applicable {
                let weighted = &self.strategies[index];
                if self.rng.gen_bool(weighted.probability) {
                    flags.extend(weighted.strategy.create_flags(&mut self.rng, analysis));
                }
            }
            if !flags.is_empty() {
                return flags;
            }
        }
        Vec::new()
    }

    /// Sends the next fuzz subtest, returning false if there is nothing more to run.
    fn send_next(&mut self, state: &mut FuzzState, cx: &mut StageContext<'_>) -> bool {
        if cx.is_stopped() || state.sent >= self.count || state.applicable.is_empty() {
            return false;
        }
        let no_analysis = AnalysisResult::default();
        let analysis = state.analysis.as_ref().unwrap_or(&no_analysis);
        let flags = self.blend_flags(&state.applicable, analysis);
        if flags.is_empty() {
            debug!("{}: fuzz strategies produced no flags", state.origin);
            return false;
        }
        let subtest = cx
            .subtest(&state.origin, state.sent)
            .extend_flags(flags)
            .build();
        state.sent += 1;
        cx.send_test(subtest);
        true
    }

    fn start_fuzzing(&mut self, mut state: FuzzState, cx: &mut StageContext<'_>) {
        let analysis = state.analysis.get_or_insert_with(AnalysisResult::default);
        state.applicable = self
            .strategies
            .iter()
            .enumerate()
            .filter(|(_, weighted)| weighted.strategy.is_applicable(analysis))
            .map(|(index, _)| index)
            .collect();
        if self.send_next(&mut state, cx) {
            self.pending.insert(state.origin.procid().clone(), state);
        } else {
            cx.send_result(state.origin, None);
        }
    }
}

impl Stage for FuzzerProducer {
    fn name(&self) -> &str {
        "fuzzer"
    }

    fn generates_tests(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        let analysis_flags = self.analysis_flags();
        let state = FuzzState {
            origin: Arc::clone(&test),
            analysis: None,
            applicable: Vec::new(),
            sent: 0,
        };
        if analysis_flags.is_empty() {
            self.start_fuzzing(state, cx);
            return;
        }
        let subtest = cx
            .subtest(&test, "analysis")
            .extend_flags(analysis_flags)
            .keep_output()
            .build();
        self.pending.insert(test.procid().clone(), state);
        cx.send_test(subtest);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        let Some(origin) = test.origin() else {
            cx.send_result(test, None);
            return;
        };
        let Some(mut state) = self.pending.remove(origin.procid()) else {
            debug!("{test}: result after fuzzing was abandoned");
            return;
        };

        if state.analysis.is_none() {
            let stdout = match &result {
                Some(TestResult::Single(single)) => single
                    .output
                    .as_ref()
                    .and_then(|output| output.stdout.as_deref()),
                _ => None,
            };
            let analysis = match stdout {
                Some(stdout) => AnalysisResult::parse(stdout),
                None => {
                    warn!("{test}: analysis run produced no output");
                    AnalysisResult::default()
                }
            };
            state.analysis = Some(analysis);
            if cx.is_stopped() {
                return;
            }
            self.start_fuzzing(state, cx);
            return;
        }

        if self.send_next(&mut state, cx) {
            self.pending.insert(state.origin.procid().clone(), state);
        } else {
            cx.send_result(state.origin, None);
        }
    }

    fn stop(&mut self) {
        self.pending.clear();
    }
}
