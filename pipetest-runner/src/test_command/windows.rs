// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TerminateSignal;
use std::process::ExitStatus;

// Process groups are a Unix concept; a no-op here.
pub(super) fn set_process_group(_cmd: &mut std::process::Command) {}

pub(super) fn signal_group(handle: &duct::Handle, _pid: Option<u32>, _signal: TerminateSignal) {
    // There's no graceful termination on Windows: both signals kill the child.
    let _ = handle.kill();
}

pub(super) fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
