// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestCommand;
use crate::{
    errors::JobError, pool::WorkerContext, result::ProcessOutput, stopwatch::StopwatchSnapshot,
};
use crossbeam_channel::RecvTimeoutError;
use std::{io, process::Output, sync::Arc};
use tracing::debug;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[path = "unix.rs"]
        mod unix;
        use unix as os;
    } else if #[cfg(windows)] {
        #[path = "windows.rs"]
        mod windows;
        use windows as os;
    } else {
        compile_error!("unsupported target platform");
    }
}

/// The signal used to ask a process group to exit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TerminateSignal {
    Term,
    Kill,
}

/// A running test process, shared between the job that waits on it and the pool that may need to
/// terminate it.
#[derive(Clone, Debug)]
pub(crate) struct ChildProcess {
    handle: Arc<duct::Handle>,
    pid: Option<u32>,
}

impl ChildProcess {
    /// Sends `signal` to the process group of this child.
    pub(crate) fn signal(&self, signal: TerminateSignal) {
        os::signal_group(&self.handle, self.pid, signal);
    }
}

pub(super) fn run(command: &TestCommand, cx: &WorkerContext) -> Result<ProcessOutput, JobError> {
    let mut expression = duct::cmd(command.program.as_str(), &command.args)
        .stdin_null()
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .before_spawn(|cmd| {
            os::set_process_group(cmd);
            Ok(())
        });
    for (key, value) in &command.env {
        expression = expression.env(key, value);
    }

    let stopwatch = crate::stopwatch::stopwatch();
    let handle = expression.start().map_err(|error| JobError::Spawn {
        command: command.to_string(),
        error,
    })?;
    let handle = Arc::new(handle);
    let child = ChildProcess {
        pid: handle.pids().first().copied(),
        handle: Arc::clone(&handle),
    };
    let _registration = cx.register_child(child.clone());

    // duct's wait blocks, so wait on a separate thread and time out on the channel instead.
    let (sender, receiver) = crossbeam_channel::bounded(1);
    let wait_handle = Arc::clone(&handle);
    std::thread::spawn(move || {
        let _ = sender.send(wait_handle.wait().cloned());
    });

    let mut timed_out = false;
    let output = match receiver.recv_timeout(command.timeout) {
        Ok(output) => output,
        Err(RecvTimeoutError::Timeout) => {
            timed_out = true;
            debug!(
                "`{command}` timed out after {:?}, terminating",
                command.timeout
            );
            child.signal(TerminateSignal::Term);
            match receiver.recv_timeout(command.grace_period) {
                Ok(output) => output,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("`{command}` did not exit within the grace period, killing");
                    child.signal(TerminateSignal::Kill);
                    receiver
                        .recv()
                        .unwrap_or_else(|_| Err(wait_thread_exited()))
                }
                Err(RecvTimeoutError::Disconnected) => Err(wait_thread_exited()),
            }
        }
        Err(RecvTimeoutError::Disconnected) => Err(wait_thread_exited()),
    };
    let output = output.map_err(|error| JobError::Collect {
        command: command.to_string(),
        error,
    })?;

    let snapshot = stopwatch.snapshot();
    Ok(process_output(output, timed_out, snapshot))
}

fn wait_thread_exited() -> io::Error {
    io::Error::other("wait thread exited without reporting a status")
}

fn process_output(output: Output, timed_out: bool, snapshot: StopwatchSnapshot) -> ProcessOutput {
    ProcessOutput {
        exit_code: output.status.code(),
        signal: os::exit_signal(&output.status),
        timed_out,
        stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        start_time: snapshot.start_time,
        duration: snapshot.duration,
    }
}
