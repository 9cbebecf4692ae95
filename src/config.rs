use serde::{Deserialize, Serialize};

use crate::cli::CliArguments;
use crate::error::{ProfilerError, Result};
use crate::profiler::PerformanceThresholds;

pub const DEFAULT_MAX_RAW_QUERY_LEN: usize = 500;
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Profiler settings, read-only once the registry is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfilerConfig {
    pub thresholds: PerformanceThresholds,
    /// Raw query text longer than this many characters is truncated.
    pub max_raw_query_len: usize,
    /// Also replace inline string and numeric literals when normalizing.
    pub fold_literals: bool,
    /// Finished profile summaries kept for the admin surface.
    pub max_history: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            thresholds: PerformanceThresholds::default(),
            max_raw_query_len: DEFAULT_MAX_RAW_QUERY_LEN,
            fold_literals: false,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl ProfilerConfig {
    pub fn with_thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_fold_literals(mut self, fold_literals: bool) -> Self {
        self.fold_literals = fold_literals;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.max_raw_query_len == 0 {
            return Err(ProfilerError::InvalidConfig(
                "max_raw_query_len must be greater than zero".into(),
            ));
        }
        if self.max_history == 0 {
            return Err(ProfilerError::InvalidConfig(
                "max_history must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<&CliArguments> for ProfilerConfig {
    type Error = ProfilerError;

    fn try_from(args: &CliArguments) -> Result<Self> {
        let config = Self {
            thresholds: PerformanceThresholds {
                slow_query_ms: args.slow_query_ms,
                n1_pattern_threshold: args.n1_threshold,
                max_queries_per_request_warning: args.max_queries_warning,
                slow_total_duration_ms: args.slow_total_ms,
            },
            max_raw_query_len: args.max_raw_query_len,
            fold_literals: args.fold_literals,
            max_history: args.history_size,
        };
        config.validate()?;
        Ok(config)
    }
}
