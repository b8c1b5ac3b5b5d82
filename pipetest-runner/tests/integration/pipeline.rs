// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, WrapErr, ensure};
use indoc::{formatdoc, indoc};
use pipetest_metadata::{PipetestExitCode, RunStatus};
use pipetest_runner::{
    classifier::{OutputClassifier, Verdict},
    config::PipelineConfig,
    errors::PoolError,
    pipeline::{PipelineBuilder, TestEvent},
    result::{ProcessOutput, ResultRequirement, TestResult},
    stages::ExecutionStage,
    summary::final_exit_code,
    test_instance::ExpectedOutcomes,
};
use pretty_assertions::assert_eq;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

fn load_config(scripts: &ScriptDir, contents: &str) -> Result<PipelineConfig> {
    let path = scripts.path("pipetest.toml");
    std::fs::write(&path, contents).wrap_err("failed to write config")?;
    Ok(PipelineConfig::from_sources(Some(&path))?)
}

#[derive(Debug, Default)]
struct Events {
    loaded: Vec<String>,
    finished: Vec<(String, Option<TestResult>)>,
    stopped: Vec<String>,
}

impl Events {
    fn record(&mut self, event: TestEvent<'_>) {
        match event {
            TestEvent::Loaded { test } => self.loaded.push(test.procid().to_string()),
            TestEvent::Finished { test, result } => self
                .finished
                .push((test.procid().to_string(), result.cloned())),
            TestEvent::Stopped { reason } => self.stopped.push(reason.to_owned()),
            TestEvent::Heartbeat => {}
        }
    }
}

#[test]
fn variants_and_reruns_run_to_completion() -> Result<()> {
    test_init();

    let scripts = ScriptDir::new()?;
    let marker = scripts.path("flaky.marker");
    let tests = vec![
        scripts.script("one.sh", "exit 0\n")?,
        scripts.script(
            "two.sh",
            &formatdoc! {r#"
                if [ "$1" = "--variant=b" ] && [ ! -e "{marker}" ]; then
                    touch "{marker}"
                    echo "first attempt of variant b fails" >&2
                    exit 1
                fi
                exit 0
            "#},
        )?,
        scripts.script("three.sh", "echo three\nexit 0\n")?,
    ];
    let config = load_config(
        &scripts,
        indoc! {r#"
            [profile.default]
            test-threads = 2
            heartbeat-timeout = "100ms"
            rerun-failures-count = 1
            variants = [
                { name = "a", flags = ["--variant=a"] },
                { name = "b", flags = ["--variant=b"] },
            ]
        "#},
    )?;
    let profile = config.profile(PipelineConfig::DEFAULT_PROFILE)?;

    let execution = profile
        .execution_stage(scripts.context())?
        .with_command_builder(ShellCommandBuilder);
    let pipeline = profile
        .pipeline_builder()
        .head_requirement(ResultRequirement::DropPassOutput)
        .build(execution)?;
    ensure!(
        pipeline.execution_requirement() >= ResultRequirement::DropOutput,
        "reruns need pass/fail information"
    );

    let mut events = Events::default();
    let summary = pipeline.execute(
        tests.into_iter().map(Arc::new).collect::<Vec<_>>(),
        |event| events.record(event),
    );

    assert_eq!(events.loaded, ["shell/one.sh", "shell/two.sh", "shell/three.sh"]);
    assert_eq!(events.finished.len(), 3, "one result per root test");
    assert!(events.stopped.is_empty());

    assert_eq!(summary.loaded(), 3);
    assert_eq!(summary.finished(), 3);
    assert_eq!(summary.passed(), 3);
    assert_eq!(summary.flaky(), 1);
    assert_eq!(summary.failed(), 0);
    assert!(summary.failures().is_empty());
    assert_eq!(final_exit_code(&summary, None), PipetestExitCode::OK);

    let (_, two) = events
        .finished
        .iter()
        .find(|(procid, _)| procid == "shell/two.sh")
        .expect("two.sh finished");
    let Some(TestResult::Grouped(grouped)) = two else {
        panic!("variants report a grouped result, got {two:?}");
    };
    let members: Vec<_> = grouped
        .results
        .iter()
        .map(|(test, result)| (test.procid().to_string(), result.status()))
        .collect();
    ensure!(members.len() == 2, "one result per variant: {members:?}");
    for (procid, status) in &members {
        ensure!(*status == Some(RunStatus::Pass), "{procid} passed in the end");
    }
    let rerun = grouped
        .results
        .iter()
        .find_map(|(test, result)| match result {
            TestResult::Rerun(rerun) => Some((test.procid().to_string(), rerun)),
            _ => None,
        });
    let (procid, rerun) = rerun.expect("variant b was rerun");
    assert_eq!(procid, "shell/two.sh/variant-b");
    assert_eq!(rerun.attempts().len(), 2);
    assert!(rerun.attempts()[0].has_unexpected_output);
    assert!(rerun.is_flaky());

    Ok(())
}

#[test]
fn failure_limit_stops_the_run() -> Result<()> {
    test_init();

    let scripts = ScriptDir::new()?;
    let mut tests = Vec::new();
    for index in 0..20 {
        tests.push(Arc::new(scripts.script(
            &format!("fail-{index}.sh"),
            "echo failing >&2\nexit 1\n",
        )?));
    }
    let config = load_config(
        &scripts,
        indoc! {r#"
            [profile.default]
            test-threads = 2
            max-failures = 1
            initial-batch-size = 4
        "#},
    )?;
    let profile = config.profile(PipelineConfig::DEFAULT_PROFILE)?;
    let execution = profile
        .execution_stage(scripts.context())?
        .with_command_builder(ShellCommandBuilder);
    let pipeline = profile.pipeline_builder().build(execution)?;

    let mut events = Events::default();
    let summary = pipeline.execute(tests, |event| events.record(event));

    assert_eq!(events.stopped.len(), 1, "stopped exactly once");
    let reason = summary.stop_reason().expect("run was stopped");
    ensure!(
        reason.contains("reached the failure limit (1)"),
        "unexpected stop reason: {reason}"
    );
    ensure!(summary.loaded() < 20, "loading stops with the run");
    ensure!(summary.failed() >= 1);
    let failure = &summary.failures()[0];
    let stderr = failure
        .result
        .output
        .as_ref()
        .and_then(|output| output.stderr.as_deref());
    assert_eq!(stderr, Some("failing\n"), "failing output is retained");
    assert_eq!(
        final_exit_code(&summary, None),
        PipetestExitCode::TESTS_FAILED
    );

    Ok(())
}

#[test]
fn total_timeout_interrupts_long_tests() -> Result<()> {
    test_init();

    let scripts = ScriptDir::new()?;
    let tests = vec![Arc::new(scripts.script("sleepy.sh", "exec sleep 30\n")?)];
    let config = load_config(
        &scripts,
        indoc! {r#"
            [profile.default]
            test-threads = 1
            heartbeat-timeout = "50ms"
            total-timeout = "300ms"
        "#},
    )?;
    let profile = config.profile(PipelineConfig::DEFAULT_PROFILE)?;
    let execution = profile
        .execution_stage(scripts.context())?
        .with_command_builder(ShellCommandBuilder);
    let pipeline = profile.pipeline_builder().build(execution)?;

    let start = Instant::now();
    let summary = pipeline.execute(tests, |_| {});
    let elapsed = start.elapsed();

    ensure!(
        elapsed < Duration::from_secs(15),
        "run took {elapsed:?} despite the total timeout"
    );
    let reason = summary.stop_reason().expect("run was stopped");
    ensure!(
        reason.starts_with("timeout: total timeout of 300ms exceeded"),
        "unexpected stop reason: {reason}"
    );
    assert_eq!(summary.finished(), 0, "the sleeping test never reports");
    assert_eq!(
        final_exit_code(&summary, None),
        PipetestExitCode::TESTS_FAILED
    );

    Ok(())
}

#[test]
fn bare_pipeline_reports_failures_with_output() -> Result<()> {
    test_init();

    let scripts = ScriptDir::new()?;
    let tests = vec![Arc::new(scripts.script("broken.sh", "echo broken >&2\nexit 1\n")?)];
    let execution = ExecutionStage::new(1, Duration::from_millis(100), scripts.context())?
        .with_command_builder(ShellCommandBuilder);
    let pipeline = PipelineBuilder::new().build(execution)?;
    assert_eq!(
        pipeline.execution_requirement(),
        ResultRequirement::DropPassOutput,
        "the run summary needs failure output"
    );

    let summary = pipeline.execute(tests, |_| {});

    assert_eq!(summary.finished(), 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.no_result(), 0);
    let stderr = summary.failures()[0]
        .result
        .output
        .as_ref()
        .and_then(|output| output.stderr.as_deref());
    assert_eq!(stderr, Some("broken\n"));
    assert_eq!(
        final_exit_code(&summary, None),
        PipetestExitCode::TESTS_FAILED
    );

    Ok(())
}

/// A panic payload that panics again when dropped, taking the worker thread down with it.
struct PanicOnDrop;

impl Drop for PanicOnDrop {
    fn drop(&mut self) {
        panic!("worker torn down");
    }
}

#[derive(Debug)]
struct WorkerKillingClassifier;

impl OutputClassifier for WorkerKillingClassifier {
    fn classify(&self, _output: &ProcessOutput, _expected: &ExpectedOutcomes) -> Verdict {
        std::panic::panic_any(PanicOnDrop)
    }
}

#[test]
fn pool_failure_still_produces_a_summary() -> Result<()> {
    test_init();

    let scripts = ScriptDir::new()?;
    let tests = vec![Arc::new(scripts.script("fine.sh", "exit 0\n")?)];
    let execution = ExecutionStage::new(1, Duration::from_millis(100), scripts.context())?
        .with_command_builder(ShellCommandBuilder)
        .with_classifier(SUITE, WorkerKillingClassifier);
    let pipeline = PipelineBuilder::new().build(execution)?;

    let mut events = Events::default();
    let summary = pipeline.execute(tests, |event| events.record(event));

    assert_eq!(events.stopped, ["internal pool error"]);
    assert_eq!(summary.loaded(), 1);
    assert_eq!(summary.finished(), 0);
    assert_eq!(summary.stop_reason(), Some("internal pool error"));
    let error = summary.internal_error().expect("pool failure is recorded");
    ensure!(
        matches!(error, PoolError::WorkersDisconnected { outstanding: 1 }),
        "unexpected pool error: {error}"
    );
    assert_eq!(
        final_exit_code(&summary, None),
        PipetestExitCode::INTERNAL_ERROR
    );
    ensure!(summary.to_final().internal_error.is_some());

    Ok(())
}
