// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Shared vocabulary for pipetest.
//!
//! This crate contains the types that reporting collaborators consume without depending on the
//! whole runner: outcome keywords as they appear in status files, the coarse status of a single
//! run, the documented exit codes, and the serializable form of a final run summary.

mod errors;
mod exit_codes;
mod outcome;
mod summary;

pub use errors::*;
pub use exit_codes::*;
pub use outcome::*;
pub use summary::*;
