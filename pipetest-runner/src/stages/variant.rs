// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    pipeline::{Stage, StageContext},
    result::{GroupedResult, TestResult},
    test_instance::{ProcedureId, TestInstance},
};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// A named set of flags that every test is run with.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Variant {
    /// The name of the variant, used as the subtest suffix.
    pub name: String,

    /// Flags appended to the test's own flags.
    #[serde(default)]
    pub flags: Vec<String>,
}

impl Variant {
    /// Creates a new variant.
    pub fn new(name: impl Into<String>, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Runs every test once per configured variant, in the configured order.
///
/// Variants of one test run one after another. The predecessor receives a
/// [`Grouped`](TestResult::Grouped) result with one entry per variant that produced a result.
#[derive(Debug)]
pub struct VariantProducer {
    variants: Vec<Variant>,
    pending: HashMap<ProcedureId, VariantState>,
}

#[derive(Debug)]
struct VariantState {
    origin: Arc<TestInstance>,
    next: usize,
    results: Vec<(Arc<TestInstance>, TestResult)>,
}

impl VariantProducer {
    /// Creates a new producer. An empty list runs every test once, with no extra flags, as the
    /// `default` variant.
    pub fn new(variants: impl IntoIterator<Item = Variant>) -> Self {
        let mut variants: Vec<_> = variants.into_iter().collect();
        if variants.is_empty() {
            variants.push(Variant::new("default", Vec::<String>::new()));
        }
        Self {
            variants,
            pending: HashMap::new(),
        }
    }

    /// Returns the number of tests with variants still to run.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn send_next(&self, state: &mut VariantState, cx: &mut StageContext<'_>) -> bool {
        let Some(variant) = self.variants.get(state.next) else {
            return false;
        };
        state.next += 1;
        let subtest = cx
            .subtest(&state.origin, &variant.name)
            .extend_flags(variant.flags.iter().cloned())
            .build();
        cx.send_test(subtest);
        true
    }
}

impl Stage for VariantProducer {
    fn name(&self) -> &str {
        "variant"
    }

    fn generates_tests(&self) -> bool {
        true
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        let mut state = VariantState {
            origin: test,
            next: 0,
            results: Vec::new(),
        };
        if self.send_next(&mut state, cx) {
            self.pending.insert(state.origin.procid().clone(), state);
        }
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        let Some(origin) = test.origin() else {
            cx.send_result(test, result);
            return;
        };
        let Some(mut state) = self.pending.remove(origin.procid()) else {
            debug!("{test}: result after its variants were abandoned");
            return;
        };
        if let Some(result) = result {
            state.results.push((test, result));
        }
        if !cx.is_stopped() && self.send_next(&mut state, cx) {
            self.pending.insert(state.origin.procid().clone(), state);
            return;
        }

        let result = if state.results.is_empty() {
            None
        } else {
            Some(TestResult::Grouped(GroupedResult {
                results: state.results,
            }))
        };
        cx.send_result(state.origin, result);
    }

    fn stop(&mut self) {
        self.pending.clear();
    }
}
