// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting a test run into shards that independent machines can run.
//!
//! Two schemes are supported. `count:M/N` keeps every Nth test starting at the Mth, using a single
//! rotating counter; it needs the tests in a stable order. `hash:M/N` keeps tests whose name
//! hashes into shard M; it is stateless and stable when new tests are added.

use crate::errors::PartitionerBuilderParseError;
use serde::{Deserialize, Deserializer};
use std::{fmt, str::FromStr};
use xxhash_rust::xxh64::xxh64;

/// A description of one shard, from which a [`Partitioner`] can be built.
///
/// Created by parsing `count:M/N` or `hash:M/N`, or with [`count`](Self::count) and
/// [`hash`](Self::hash). Either way `1 <= shard <= total_shards`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum PartitionerBuilder {
    /// Round-robin on the order tests arrive in.
    #[non_exhaustive]
    Count {
        /// The shard this is in, counting up from 1.
        shard: u64,

        /// The total number of shards.
        total_shards: u64,
    },

    /// Partition based on hashing the full test name.
    #[non_exhaustive]
    Hash {
        /// The shard this is in, counting up from 1.
        shard: u64,

        /// The total number of shards.
        total_shards: u64,
    },
}

/// Decides, test by test, whether a test belongs to the shard.
pub trait Partitioner: fmt::Debug {
    /// Returns true if the given test belongs to the shard.
    fn test_matches(&mut self, test_name: &str) -> bool;
}

impl PartitionerBuilder {
    /// Describes shard `shard` of `total_shards` under the round-robin scheme.
    pub fn count(shard: u64, total_shards: u64) -> Result<Self, PartitionerBuilderParseError> {
        check_shard(shard, total_shards, "count:M/N")?;
        Ok(PartitionerBuilder::Count {
            shard,
            total_shards,
        })
    }

    /// Describes shard `shard` of `total_shards` under the hash scheme.
    pub fn hash(shard: u64, total_shards: u64) -> Result<Self, PartitionerBuilderParseError> {
        check_shard(shard, total_shards, "hash:M/N")?;
        Ok(PartitionerBuilder::Hash {
            shard,
            total_shards,
        })
    }

    /// Creates a new partitioner. Count partitioners start their counter at zero.
    pub fn build(&self) -> Box<dyn Partitioner> {
        match *self {
            PartitionerBuilder::Count {
                shard,
                total_shards,
            } => Box::new(CountPartitioner::new(shard, total_shards)),
            PartitionerBuilder::Hash {
                shard,
                total_shards,
            } => Box::new(HashPartitioner::new(shard, total_shards)),
        }
    }
}

impl fmt::Display for PartitionerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionerBuilder::Count {
                shard,
                total_shards,
            } => write!(f, "count:{shard}/{total_shards}"),
            PartitionerBuilder::Hash {
                shard,
                total_shards,
            } => write!(f, "hash:{shard}/{total_shards}"),
        }
    }
}

impl FromStr for PartitionerBuilder {
    type Err = PartitionerBuilderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(input) = s.strip_prefix("hash:") {
            let (shard, total_shards) = parse_shards(input, "hash:M/N")?;
            Self::hash(shard, total_shards)
        } else if let Some(input) = s.strip_prefix("count:") {
            let (shard, total_shards) = parse_shards(input, "count:M/N")?;
            Self::count(shard, total_shards)
        } else {
            Err(PartitionerBuilderParseError::new(
                None,
                format!("partition input '{s}' must begin with \"hash:\" or \"count:\""),
            ))
        }
    }
}

impl<'de> Deserialize<'de> for PartitionerBuilder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_shards(
    input: &str,
    expected_format: &'static str,
) -> Result<(u64, u64), PartitionerBuilderParseError> {
    let Some((shard_str, total_shards_str)) = input.split_once('/') else {
        return Err(PartitionerBuilderParseError::new(
            Some(expected_format),
            format!("expected input '{input}' to be in the format M/N"),
        ));
    };

    let shard: u64 = shard_str.parse().map_err(|err| {
        PartitionerBuilderParseError::new(
            Some(expected_format),
            format!("failed to parse shard '{shard_str}' as u64: {err}"),
        )
    })?;

    let total_shards: u64 = total_shards_str.parse().map_err(|err| {
        PartitionerBuilderParseError::new(
            Some(expected_format),
            format!("failed to parse total_shards '{total_shards_str}' as u64: {err}"),
        )
    })?;

    Ok((shard, total_shards))
}

fn check_shard(
    shard: u64,
    total_shards: u64,
    expected_format: &'static str,
) -> Result<(), PartitionerBuilderParseError> {
    if (1..=total_shards).contains(&shard) {
        Ok(())
    } else {
        Err(PartitionerBuilderParseError::new(
            Some(expected_format),
            format!(
                "shard {shard} must be a number between 1 and total shards {total_shards}, inclusive"
            ),
        ))
    }
}

#[derive(Clone, Debug)]
struct CountPartitioner {
    shard_minus_one: u64,
    total_shards: u64,
    curr: u64,
}

impl CountPartitioner {
    fn new(shard: u64, total_shards: u64) -> Self {
        Self {
            shard_minus_one: shard - 1,
            total_shards,
            curr: 0,
        }
    }
}

impl Partitioner for CountPartitioner {
    fn test_matches(&mut self, _test_name: &str) -> bool {
        let matches = self.curr == self.shard_minus_one;
        self.curr = (self.curr + 1) % self.total_shards;
        matches
    }
}

#[derive(Clone, Debug)]
struct HashPartitioner {
    shard_minus_one: u64,
    total_shards: u64,
}

impl HashPartitioner {
    fn new(shard: u64, total_shards: u64) -> Self {
        Self {
            shard_minus_one: shard - 1,
            total_shards,
        }
    }
}

impl Partitioner for HashPartitioner {
    fn test_matches(&mut self, test_name: &str) -> bool {
        // Fixed to xxhash64 with seed 0 so shard assignments are stable across releases.
        xxh64(test_name.as_bytes(), 0) % self.total_shards == self.shard_minus_one
    }
}
