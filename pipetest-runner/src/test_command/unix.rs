// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TerminateSignal;
use libc::{SIGKILL, SIGTERM};
use std::{
    os::unix::process::{CommandExt, ExitStatusExt},
    process::ExitStatus,
};

/// Pre-execution configuration on Unix.
///
/// This puts the child in a new process group whose id is the child's pid.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

pub(super) fn signal_group(handle: &duct::Handle, pid: Option<u32>, signal: TerminateSignal) {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        // Without a pid there's no group to signal: fall back to killing the direct child.
        let _ = handle.kill();
        return;
    };
    // A negative pid signals the whole process group.
    // SAFETY: kill has no memory-safety preconditions.
    unsafe { libc::kill(-pid, signal.signal()) };
}

pub(super) fn exit_signal(status: &ExitStatus) -> Option<i32> {
    status.signal()
}

impl TerminateSignal {
    fn signal(self) -> libc::c_int {
        match self {
            TerminateSignal::Term => SIGTERM,
            TerminateSignal::Kill => SIGKILL,
        }
    }
}
