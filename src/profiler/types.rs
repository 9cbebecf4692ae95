use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};

/// Opaque bound value of a recorded query. Never interpreted, only logged.
pub type QueryParam = serde_json::Value;

/// Process-wide thresholds used when a profile is analysed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    /// A single query slower than this is counted as slow.
    pub slow_query_ms: f64,
    /// Minimum repeat count of one normalized pattern to flag an N+1 storm.
    pub n1_pattern_threshold: usize,
    /// More queries than this in one request triggers a recommendation.
    pub max_queries_per_request_warning: usize,
    /// Cumulative query time above which caching is recommended.
    pub slow_total_duration_ms: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            slow_query_ms: 100.0,
            n1_pattern_threshold: 10,
            max_queries_per_request_warning: 50,
            slow_total_duration_ms: 1000.0,
        }
    }
}

impl PerformanceThresholds {
    pub fn validate(&self) -> Result<()> {
        if !self.slow_query_ms.is_finite() || self.slow_query_ms < 0.0 {
            return Err(ProfilerError::InvalidConfig(format!(
                "slow_query_ms must be a non-negative number, got {}",
                self.slow_query_ms
            )));
        }
        if !self.slow_total_duration_ms.is_finite() || self.slow_total_duration_ms < 0.0 {
            return Err(ProfilerError::InvalidConfig(format!(
                "slow_total_duration_ms must be a non-negative number, got {}",
                self.slow_total_duration_ms
            )));
        }
        if self.n1_pattern_threshold < 2 {
            return Err(ProfilerError::InvalidConfig(format!(
                "n1_pattern_threshold must be at least 2, got {}",
                self.n1_pattern_threshold
            )));
        }
        Ok(())
    }
}

/// One observed database call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_pattern: String,
    pub raw_query: String,
    pub params: Vec<QueryParam>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub label: Option<String>,
}

/// Occurrences of one normalized pattern within a profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternStat {
    pub pattern: String,
    pub occurrences: usize,
    pub total_duration_ms: f64,
}

/// Finished, analysed profile of one logical request.
///
/// Returned by value when profiling finishes; the registry keeps no
/// reference to it afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryProfile {
    pub request_id: String,
    pub queries: Vec<QueryRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub query_count: usize,
    pub total_duration_ms: f64,
    pub slow_queries: usize,
    pub potential_n1: bool,
    /// Sorted by occurrences, most repeated first.
    pub patterns: Vec<PatternStat>,
    pub thresholds: PerformanceThresholds,
}

impl QueryProfile {
    /// The most repeated pattern, if it crossed the N+1 threshold.
    pub fn n1_pattern(&self) -> Option<&PatternStat> {
        if !self.potential_n1 {
            return None;
        }
        self.patterns.first()
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            request_id: self.request_id.clone(),
            query_count: self.query_count,
            total_duration_ms: self.total_duration_ms,
            slow_queries: self.slow_queries,
            potential_n1: self.potential_n1,
            top_pattern: self.patterns.first().cloned(),
            finished_at: self.finished_at,
        }
    }
}

/// Compact view of a finished profile kept for the admin surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub request_id: String,
    pub query_count: usize,
    pub total_duration_ms: f64,
    pub slow_queries: usize,
    pub potential_n1: bool,
    pub top_pattern: Option<PatternStat>,
    pub finished_at: DateTime<Utc>,
}
