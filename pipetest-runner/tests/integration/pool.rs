// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pipetest_runner::{
    errors::JobError,
    pool::{BUFFER_FACTOR, ExecutionPool, PoolEvent, PoolJob, WorkerContext},
    result::ProcessOutput,
    test_command::TestCommand,
};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ShellJob(TestCommand);

impl PoolJob for ShellJob {
    type Output = ProcessOutput;

    fn run(self, cx: &WorkerContext) -> Result<ProcessOutput, JobError> {
        self.0.run(cx)
    }
}

fn shell_job(script: &str) -> ShellJob {
    ShellJob(
        TestCommand::new("/bin/sh", ["-c", script], Duration::from_secs(60))
            .with_grace_period(Duration::from_millis(500)),
    )
}

fn process_exists(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks whether the process exists.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[test]
fn abort_terminates_running_processes() -> Result<()> {
    test_init();

    let scripts = ScriptDir::new()?;
    let workers = 4;
    let mut pool = ExecutionPool::new(workers, Duration::from_millis(100))?
        .with_grace_period(Duration::from_millis(500));
    let handle = pool.handle();

    pool.add((0..100).map(|index| {
        if index < 2 {
            shell_job("exit 0")
        } else {
            let pid_file = scripts.path(&format!("{index}.pid"));
            shell_job(&format!("echo $$ > {pid_file}; exec sleep 30"))
        }
    }));
    ensure!(pool.in_flight() <= workers * BUFFER_FACTOR);

    let mut completed = 0;
    let mut aborted_at = None;
    while let Some(event) = pool.next_event()? {
        if let PoolEvent::Completed { outcome, .. } = event {
            outcome?;
            completed += 1;
            if completed == 2 {
                handle.abort();
                aborted_at = Some(Instant::now());
            }
        }
    }
    pool.close()?;

    let aborted_at = aborted_at.expect("two fast jobs completed");
    let shutdown = aborted_at.elapsed();
    ensure!(
        shutdown < Duration::from_secs(10),
        "pool took {shutdown:?} to shut down"
    );
    ensure!(completed <= 2 + workers, "abandoned jobs are not reported");

    // Every job that got as far as recording its pid must be gone.
    let deadline = Instant::now() + Duration::from_secs(5);
    for entry in std::fs::read_dir(scripts.root())? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("pid") {
            continue;
        }
        let Ok(pid) = std::fs::read_to_string(&path)?.trim().parse::<libc::pid_t>() else {
            continue;
        };
        while process_exists(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        ensure!(!process_exists(pid), "process {pid} outlived the pool");
    }

    Ok(())
}

#[test]
fn results_arrive_in_completion_order() -> Result<()> {
    test_init();

    let mut pool = ExecutionPool::new(2, Duration::from_secs(5))?;
    let slow = pool.submit(shell_job("sleep 1; echo slow"));
    let fast = pool.submit(shell_job("echo fast"));

    let mut order = Vec::new();
    while let Some(event) = pool.next_event()? {
        if let PoolEvent::Completed { job_id, outcome } = event {
            let output = outcome?;
            ensure!(output.exit_code == Some(0));
            order.push((job_id, output.stdout.unwrap_or_default()));
        }
    }
    pool.close()?;

    ensure!(
        order == [(fast, "fast\n".to_owned()), (slow, "slow\n".to_owned())],
        "unexpected order: {order:?}"
    );
    Ok(())
}
