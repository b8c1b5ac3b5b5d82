// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for pipetest runs.
//!
//! Configuration is read from the embedded `default-config.toml`, with an optional repository
//! config file layered on top. Settings are grouped into named profiles under `[profile.<name>]`;
//! every profile other than `default` inherits the keys it does not set from `default`.
//!
//! Values from a [`PipelineProfile`] are plain inputs to stage constructors. The profile can also
//! assemble the standard stage chain with [`PipelineProfile::pipeline_builder`].

mod max_fail;
mod test_threads;

pub use max_fail::*;
pub use test_threads::*;

use crate::{
    errors::{ConfigParseError, PoolError, ProfileNotFound},
    partition::PartitionerBuilder,
    pipeline::PipelineBuilder,
    stages::{
        ExecutionStage, RerunProducer, ResultsTracker, SeedProducer, SequenceLimiter, ShardFilter,
        StatusFileFilter, StatusFilterMode, TimeoutWatchdog, Variant, VariantProducer,
    },
    test_command::CommandContext,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{
    collections::{BTreeSet, HashMap},
    sync::LazyLock,
    time::Duration,
};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for pipetest.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
}

impl PipelineConfig {
    /// The default configuration.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the configuration, layering `config_file` on top of the defaults if it is given.
    ///
    /// Unknown keys are reported with a warning and otherwise ignored.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        let source_path = match config_file {
            Some(path) => {
                builder = builder.add_source(File::new(path.as_str(), FileFormat::Toml));
                path.to_owned()
            }
            None => Utf8PathBuf::from("<default config>"),
        };

        let (deserialized, ignored) = Self::build_and_deserialize_config(builder)
            .map_err(|error| ConfigParseError::new(source_path.clone(), error))?;
        for path in &ignored {
            warn!("ignoring unknown configuration key in {source_path}: {path}");
        }
        Ok(deserialized.into_config())
    }

    /// Returns the configuration built from the defaults alone.
    pub fn default_config() -> Self {
        Self::from_sources(None).expect("default config is always valid")
    }

    /// Returns the profile with the given name, or an error if it is not defined.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<PipelineProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = match name {
            Self::DEFAULT_PROFILE => None,
            other => Some(self.other_profiles.get(other).ok_or_else(|| {
                ProfileNotFound::new(
                    name,
                    self.other_profiles
                        .keys()
                        .map(String::as_str)
                        .chain(std::iter::once(Self::DEFAULT_PROFILE)),
                )
            })?),
        };
        Ok(PipelineProfile {
            name: name.to_owned(),
            default_profile: &self.default_profile,
            custom_profile,
        })
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<(ConfigDeserialize, BTreeSet<String>), config::ConfigError> {
        let config = builder.build()?;
        let mut ignored = BTreeSet::new();
        let deserialized: ConfigDeserialize = serde_ignored::deserialize(config, |path| {
            ignored.insert(path.to_string());
        })?;
        Ok((deserialized, ignored))
    }
}

/// A named set of run settings, with unset keys taken from the default profile.
///
/// Returned by [`PipelineConfig::profile`].
#[derive(Clone, Debug)]
pub struct PipelineProfile<'cfg> {
    name: String,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

macro_rules! profile_field {
    ($profile:ident.$field:ident) => {
        $profile
            .custom_profile
            .and_then(|p| p.$field)
            .unwrap_or($profile.default_profile.$field)
    };
}

macro_rules! profile_field_optional {
    ($profile:ident.$field:ident) => {
        $profile
            .custom_profile
            .and_then(|p| p.$field)
            .or($profile.default_profile.$field)
    };
}

impl<'cfg> PipelineProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of execution pool workers.
    pub fn test_threads(&self) -> TestThreads {
        profile_field!(self.test_threads)
    }

    /// Returns how long the coordinator waits for a result before a heartbeat.
    pub fn heartbeat_timeout(&self) -> Duration {
        profile_field!(self.heartbeat_timeout)
    }

    /// Returns the base timeout for a single test process.
    pub fn timeout(&self) -> Duration {
        profile_field!(self.timeout)
    }

    /// Returns the budget for the whole run, if any.
    pub fn total_timeout(&self) -> Option<Duration> {
        profile_field_optional!(self.total_timeout)
    }

    /// Returns true if the binary under test was built in a slow configuration.
    pub fn slow_configuration(&self) -> bool {
        profile_field!(self.slow_configuration)
    }

    /// Returns the failure limit.
    pub fn max_failures(&self) -> MaxFail {
        profile_field!(self.max_failures)
    }

    /// Returns how many times a test with unexpected output is rerun.
    pub fn rerun_failures_count(&self) -> usize {
        profile_field!(self.rerun_failures_count)
    }

    /// Returns the limit on reruns over the whole run, if any.
    pub fn rerun_max_total(&self) -> Option<usize> {
        profile_field_optional!(self.rerun_max_total)
    }

    /// Returns the maximum number of heavy tests in flight.
    pub fn heavy_tests_limit(&self) -> usize {
        profile_field!(self.heavy_tests_limit)
    }

    /// Returns the number of tests loaded before the first result arrives.
    pub fn initial_batch_size(&self) -> usize {
        profile_field!(self.initial_batch_size)
    }

    /// Returns the shard to run, if any.
    pub fn partition(&self) -> Option<PartitionerBuilder> {
        profile_field_optional!(self.partition)
    }

    /// Returns the fixed random seed passed to every test, if any.
    pub fn random_seed(&self) -> Option<i32> {
        profile_field_optional!(self.random_seed)
    }

    /// Returns what to do with tests marked `SLOW`.
    pub fn slow_tests(&self) -> StatusFilterMode {
        profile_field!(self.slow_tests)
    }

    /// Returns what to do with tests expected to either pass or fail.
    pub fn pass_fail_tests(&self) -> StatusFilterMode {
        profile_field!(self.pass_fail_tests)
    }

    /// Returns the variants every test runs with, in order.
    pub fn variants(&self) -> &'cfg [Variant] {
        self.custom_profile
            .and_then(|p| p.variants.as_deref())
            .unwrap_or(&self.default_profile.variants)
    }

    /// Applies the timeout settings of this profile to `context`.
    pub fn apply_to(&self, context: &mut CommandContext) {
        context.timeout = self.timeout();
        context.slow_configuration = self.slow_configuration();
    }

    /// Starts an execution stage with this profile's worker count and timeouts.
    pub fn execution_stage(&self, mut context: CommandContext) -> Result<ExecutionStage, PoolError> {
        self.apply_to(&mut context);
        ExecutionStage::new(
            self.test_threads().compute(),
            self.heartbeat_timeout(),
            context,
        )
    }

    /// Returns a builder with the standard stages configured by this profile.
    ///
    /// In order: status-file filter, shard filter, results tracker, timeout watchdog, seed,
    /// variants, reruns, and the heavy-test limiter. Stages whose settings are unset are left out.
    /// Further stages can be appended before building.
    pub fn pipeline_builder(&self) -> PipelineBuilder {
        let mut builder = PipelineBuilder::new()
            .initial_batch_size(self.initial_batch_size())
            .stage(StatusFileFilter::new(
                self.slow_tests(),
                self.pass_fail_tests(),
            ));
        if let Some(partition) = self.partition() {
            builder = builder.stage(ShardFilter::new(partition));
        }
        builder = builder.stage(ResultsTracker::new(self.max_failures()));
        if let Some(total_timeout) = self.total_timeout() {
            builder = builder.stage(TimeoutWatchdog::new(total_timeout));
        }
        if let Some(seed) = self.random_seed() {
            builder = builder.stage(SeedProducer::new(1, 1).with_fixed_seed(seed));
        }
        builder = builder.stage(VariantProducer::new(self.variants().iter().cloned()));
        if self.rerun_failures_count() > 0 {
            let mut rerun = RerunProducer::new(self.rerun_failures_count());
            if let Some(max_total) = self.rerun_max_total() {
                rerun = rerun.with_max_total(max_total);
            }
            builder = builder.stage(rerun);
        }
        builder.stage(SequenceLimiter::new(self.heavy_tests_limit()))
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDeserialize {
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl ConfigDeserialize {
    fn into_config(mut self) -> PipelineConfig {
        let p = self
            .profiles
            .remove(PipelineConfig::DEFAULT_PROFILE)
            .expect("default profile is present in the default config");
        PipelineConfig {
            default_profile: DefaultProfileImpl::new(p),
            other_profiles: self.profiles,
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    test_threads: TestThreads,
    heartbeat_timeout: Duration,
    timeout: Duration,
    total_timeout: Option<Duration>,
    slow_configuration: bool,
    max_failures: MaxFail,
    rerun_failures_count: usize,
    rerun_max_total: Option<usize>,
    heavy_tests_limit: usize,
    initial_batch_size: usize,
    partition: Option<PartitionerBuilder>,
    random_seed: Option<i32>,
    slow_tests: StatusFilterMode,
    pass_fail_tests: StatusFilterMode,
    variants: Vec<Variant>,
}

impl DefaultProfileImpl {
    // Every required key is set in default-config.toml.
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            test_threads: p
                .test_threads
                .expect("test-threads present in default profile"),
            heartbeat_timeout: p
                .heartbeat_timeout
                .expect("heartbeat-timeout present in default profile"),
            timeout: p.timeout.expect("timeout present in default profile"),
            total_timeout: p.total_timeout,
            slow_configuration: p
                .slow_configuration
                .expect("slow-configuration present in default profile"),
            max_failures: p
                .max_failures
                .expect("max-failures present in default profile"),
            rerun_failures_count: p
                .rerun_failures_count
                .expect("rerun-failures-count present in default profile"),
            rerun_max_total: p.rerun_max_total,
            heavy_tests_limit: p
                .heavy_tests_limit
                .expect("heavy-tests-limit present in default profile"),
            initial_batch_size: p
                .initial_batch_size
                .expect("initial-batch-size present in default profile"),
            partition: p.partition,
            random_seed: p.random_seed,
            slow_tests: p.slow_tests.expect("slow-tests present in default profile"),
            pass_fail_tests: p
                .pass_fail_tests
                .expect("pass-fail-tests present in default profile"),
            variants: p.variants.expect("variants present in default profile"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    test_threads: Option<TestThreads>,
    #[serde(default, with = "humantime_serde")]
    heartbeat_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    total_timeout: Option<Duration>,
    #[serde(default)]
    slow_configuration: Option<bool>,
    #[serde(default)]
    max_failures: Option<MaxFail>,
    #[serde(default)]
    rerun_failures_count: Option<usize>,
    #[serde(default)]
    rerun_max_total: Option<usize>,
    #[serde(default)]
    heavy_tests_limit: Option<usize>,
    #[serde(default)]
    initial_batch_size: Option<usize>,
    #[serde(default)]
    partition: Option<PartitionerBuilder>,
    #[serde(default)]
    random_seed: Option<i32>,
    #[serde(default)]
    slow_tests: Option<StatusFilterMode>,
    #[serde(default)]
    pass_fail_tests: Option<StatusFilterMode>,
    #[serde(default)]
    variants: Option<Vec<Variant>>,
}
