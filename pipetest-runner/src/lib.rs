// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for pipetest: a bidirectional test-processing pipeline that terminates in a
//! process pool.
//!
//! Tests enter at the head of a [`Pipeline`](pipeline::Pipeline) and flow forward through a chain
//! of [stages](pipeline::Stage). Each stage may pass a test through, drop it, or replace it with
//! subtests. The terminal [`ExecutionStage`](stages::ExecutionStage) runs tests as OS processes on
//! an [`ExecutionPool`](pool::ExecutionPool), and results flow backward through the same chain
//! until they reach the head, where they are reported.

pub mod classifier;
pub mod config;
pub mod errors;
pub mod partition;
pub mod pipeline;
pub mod pool;
pub mod result;
pub mod signal;
pub mod stages;
pub mod status_file;
mod stopwatch;
pub mod summary;
pub mod test_command;
pub mod test_instance;
