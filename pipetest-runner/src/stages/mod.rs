// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concrete pipeline stages.
//!
//! Stages fall into three groups:
//!
//! * **Filters** drop tests without running them: [`StatusFileFilter`], [`NameFilter`],
//!   [`ShardFilter`]. The [`SequenceLimiter`] never drops tests but caps how many heavy tests are
//!   in flight.
//! * **Producers** replace a test with subtests: [`VariantProducer`], [`FuzzerProducer`],
//!   [`SeedProducer`], [`RerunProducer`], [`CombinerProducer`] and [`ForgiveTimeout`].
//! * **Observers** watch the stream and stop the pipeline: [`ResultsTracker`],
//!   [`TimeoutWatchdog`] and [`SignalWatchdog`].
//!
//! The terminal [`ExecutionStage`] is not a [`Stage`](crate::pipeline::Stage): it can only be
//! supplied to [`PipelineBuilder::build`](crate::pipeline::PipelineBuilder::build).

mod combiner;
mod execution;
mod expectation;
mod fuzzer;
mod name_filter;
mod results_tracker;
mod rerun;
mod seed;
mod sequence;
mod shard;
mod signal_watchdog;
mod status_filter;
mod timeout;
mod variant;

pub use combiner::*;
pub use execution::*;
pub use expectation::*;
pub use fuzzer::*;
pub use name_filter::*;
pub use rerun::*;
pub use results_tracker::*;
pub use seed::*;
pub use sequence::*;
pub use shard::*;
pub use signal_watchdog::*;
pub use status_filter::*;
pub use timeout::*;
pub use variant::*;
