//! Per-request query profiling: collection, N+1 analysis and reporting.

pub mod analyzer;
pub mod history;
pub mod recorder;
pub mod registry;
pub mod reporter;
pub mod scope;
pub mod sink;
pub mod types;

pub use analyzer::{analyze, normalize_query, normalize_query_folding_literals};
pub use history::{HistoryStats, N1Offender, ProfileHistory};
pub use recorder::{QueryContext, EMPTY_QUERY_PATTERN};
pub use registry::ProfileRegistry;
pub use reporter::{
    analyze_profile, format_profile, recommendations, Recommendation, RecommendationKind,
    Severity,
};
pub use scope::ProfileScope;
pub use sink::ProfileSink;
pub use types::{
    PatternStat, PerformanceThresholds, ProfileSummary, QueryParam, QueryProfile, QueryRecord,
};
