// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::SignalHandlerSetupError,
    pipeline::{Stage, StageContext},
    result::TestResult,
    signal::{ShutdownEvent, SignalHandler, SignalHandlerKind, SignalStatus},
    test_instance::TestInstance,
};
use std::sync::Arc;
use tracing::info;

/// Stops the pipeline when the process receives an interrupt or termination signal.
///
/// The most severe signal received is remembered in [`SignalStatus`], which callers combine with
/// the run summary to pick the final exit code.
#[derive(Debug)]
pub struct SignalWatchdog {
    handler: SignalHandler,
    seen: Option<ShutdownEvent>,
}

impl SignalWatchdog {
    /// Installs signal handling of the given kind.
    pub fn new(kind: SignalHandlerKind) -> Result<Self, SignalHandlerSetupError> {
        Ok(Self {
            handler: kind.build()?,
            seen: None,
        })
    }

    /// Returns a handle to the recorded signal status.
    pub fn status(&self) -> SignalStatus {
        self.handler.status().clone()
    }

    fn check(&mut self, cx: &mut StageContext<'_>) {
        if self.seen.is_some() {
            return;
        }
        if let Some(event) = self.handler.status().received() {
            self.seen = Some(event);
            info!("stopping run after {event}");
            cx.stop(format!("received {event}"));
        }
    }
}

impl Stage for SignalWatchdog {
    fn name(&self) -> &str {
        "signal"
    }

    fn next_test(&mut self, test: Arc<TestInstance>, cx: &mut StageContext<'_>) {
        self.check(cx);
        cx.send_test(test);
    }

    fn result_for(
        &mut self,
        test: Arc<TestInstance>,
        result: Option<TestResult>,
        cx: &mut StageContext<'_>,
    ) {
        self.check(cx);
        cx.send_result(test, result);
    }

    fn heartbeat(&mut self, cx: &mut StageContext<'_>) {
        self.check(cx);
    }
}
