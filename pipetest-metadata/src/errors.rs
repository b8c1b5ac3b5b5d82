// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while parsing an [`Outcome`](crate::Outcome) keyword.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutcomeParseError {
    input: String,
}

impl OutcomeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for OutcomeParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unrecognized outcome keyword: {}\n(known values: {})",
            self.input,
            crate::Outcome::variants().join(", ")
        )
    }
}

impl error::Error for OutcomeParseError {}
