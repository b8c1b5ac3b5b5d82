// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that run real processes through the execution pool and the pipeline.

#[cfg(unix)]
mod fixtures;
#[cfg(unix)]
mod pipeline;
#[cfg(unix)]
mod pool;
