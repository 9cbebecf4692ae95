//! Human-readable summaries and recommendations for finished profiles.
//!
//! Nothing here fails: degenerate profiles (no queries) still produce text.

use serde::Serialize;

use super::types::QueryProfile;

/// Patterns and slow queries listed in a formatted profile.
const TOP_PATTERNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecommendationKind {
    HighQueryCount,
    SlowTotalDuration,
    NPlusOne,
    SlowQueries,
}

impl std::fmt::Display for RecommendationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendationKind::HighQueryCount => write!(f, "Query Count"),
            RecommendationKind::SlowTotalDuration => write!(f, "Total Time"),
            RecommendationKind::NPlusOne => write!(f, "N+1"),
            RecommendationKind::SlowQueries => write!(f, "Slow Query"),
        }
    }
}

/// One actionable finding about a profile.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub kind: RecommendationKind,
    pub message: String,
    pub suggestion: String,
}

impl Recommendation {
    fn new(
        severity: Severity,
        kind: RecommendationKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {} → {}",
            self.severity, self.kind, self.message, self.suggestion
        )
    }
}

/// Run every threshold check against `profile`.
///
/// Checks are independent; any subset may fire.
pub fn recommendations(profile: &QueryProfile) -> Vec<Recommendation> {
    let thresholds = &profile.thresholds;
    let mut found = Vec::new();

    if profile.query_count > thresholds.max_queries_per_request_warning {
        found.push(Recommendation::new(
            Severity::Warning,
            RecommendationKind::HighQueryCount,
            format!(
                "High query count: {} queries in one request (limit {})",
                profile.query_count, thresholds.max_queries_per_request_warning
            ),
            "Replace per-item loops with joined or batched queries",
        ));
    }

    if profile.total_duration_ms > thresholds.slow_total_duration_ms {
        found.push(Recommendation::new(
            Severity::Warning,
            RecommendationKind::SlowTotalDuration,
            format!(
                "High total query time: {:.1}ms across {} queries",
                profile.total_duration_ms, profile.query_count
            ),
            "Consider caching results or optimizing the heaviest queries",
        ));
    }

    if let Some(pattern) = profile.n1_pattern() {
        found.push(Recommendation::new(
            Severity::Critical,
            RecommendationKind::NPlusOne,
            format!(
                "Potential N+1 query: pattern repeated {} times: {}",
                pattern.occurrences, pattern.pattern
            ),
            "Add a JOIN or batch fetch (e.g. WHERE id = ANY($1)) for the repeated pattern",
        ));
    }

    if profile.slow_queries > 0 {
        found.push(Recommendation::new(
            Severity::Warning,
            RecommendationKind::SlowQueries,
            format!(
                "Slow query count: {} over {}ms",
                profile.slow_queries, thresholds.slow_query_ms
            ),
            "Add indexes for the filtered columns or restructure the slow queries",
        ));
    }

    found
}

/// Recommendation strings for `profile`, ready for a log sink.
pub fn analyze_profile(profile: &QueryProfile) -> Vec<String> {
    recommendations(profile)
        .iter()
        .map(|r| r.to_string())
        .collect()
}

/// Multi-line summary of `profile`.
pub fn format_profile(profile: &QueryProfile) -> String {
    let mut output = String::new();

    output.push_str(&format!("Query profile for request {}\n", profile.request_id));
    output.push_str(&format!("  Queries: {}\n", profile.query_count));
    output.push_str(&format!(
        "  Total duration: {:.2}ms\n",
        profile.total_duration_ms
    ));
    output.push_str(&format!(
        "  Slow queries: {} (> {}ms)\n",
        profile.slow_queries, profile.thresholds.slow_query_ms
    ));

    if let Some(pattern) = profile.n1_pattern() {
        output.push_str(&format!(
            "  WARNING: potential N+1 query, {} occurrences of: {}\n",
            pattern.occurrences, pattern.pattern
        ));
    }

    let repeated: Vec<_> = profile
        .patterns
        .iter()
        .filter(|p| p.occurrences > 1)
        .take(TOP_PATTERNS)
        .collect();

    if !repeated.is_empty() {
        output.push_str("  Top repeated patterns:\n");
        for p in repeated {
            output.push_str(&format!(
                "    {:>4}x {:>10.2}ms  {}\n",
                p.occurrences, p.total_duration_ms, p.pattern
            ));
        }
    }

    let mut slowest: Vec<_> = profile
        .queries
        .iter()
        .filter(|q| q.duration_ms > profile.thresholds.slow_query_ms)
        .collect();
    slowest.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));

    if !slowest.is_empty() {
        output.push_str("  Slowest queries:\n");
        for q in slowest.into_iter().take(TOP_PATTERNS) {
            let label = q
                .label
                .as_deref()
                .map(|l| format!("[{}] ", l))
                .unwrap_or_default();
            output.push_str(&format!(
                "    {:>10.2}ms  {}{}\n",
                q.duration_ms, label, q.raw_query
            ));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::analyzer::{analyze, normalize_query};
    use crate::profiler::types::{PerformanceThresholds, QueryRecord};
    use chrono::Utc;

    fn profile_with(queries: &[(&str, f64)]) -> QueryProfile {
        let records = queries
            .iter()
            .map(|(q, d)| QueryRecord {
                query_pattern: normalize_query(q),
                raw_query: q.to_string(),
                params: Vec::new(),
                duration_ms: *d,
                timestamp: Utc::now(),
                label: None,
            })
            .collect();
        analyze(
            "req-report".to_string(),
            Utc::now(),
            records,
            PerformanceThresholds::default(),
        )
    }

    #[test]
    fn test_empty_profile_formats_without_recommendations() {
        let profile = profile_with(&[]);
        let text = format_profile(&profile);
        assert!(text.contains("req-report"));
        assert!(text.contains("Queries: 0"));
        assert!(!text.contains("N+1"));
        assert!(analyze_profile(&profile).is_empty());
    }

    #[test]
    fn test_n1_warning_names_pattern() {
        let queries: Vec<(&str, f64)> = (0..12)
            .map(|_| ("SELECT * FROM reviews WHERE course_id = $1", 5.0))
            .collect();
        let profile = profile_with(&queries);

        let text = format_profile(&profile);
        assert!(text.contains("12 occurrences of: select * from reviews where course_id=$N"));
        assert!(text.contains("Top repeated patterns"));

        let recs = recommendations(&profile);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, RecommendationKind::NPlusOne);
        assert_eq!(recs[0].severity, Severity::Critical);
    }

    #[test]
    fn test_all_checks_can_fire_together() {
        let mut queries: Vec<(&str, f64)> = (0..55)
            .map(|_| ("SELECT * FROM lessons WHERE id = $1", 1.0))
            .collect();
        queries.push(("SELECT * FROM enrollments", 1200.0));
        let profile = profile_with(&queries);

        let kinds: Vec<_> = recommendations(&profile).iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecommendationKind::HighQueryCount,
                RecommendationKind::SlowTotalDuration,
                RecommendationKind::NPlusOne,
                RecommendationKind::SlowQueries,
            ]
        );
    }

    #[test]
    fn test_slow_queries_carry_label() {
        let record = QueryRecord {
            query_pattern: normalize_query("SELECT * FROM enrollments"),
            raw_query: "SELECT * FROM enrollments".to_string(),
            params: Vec::new(),
            duration_ms: 250.0,
            timestamp: Utc::now(),
            label: Some("enrollments.list".to_string()),
        };
        let profile = analyze(
            "req-label".to_string(),
            Utc::now(),
            vec![record],
            PerformanceThresholds::default(),
        );
        assert!(format_profile(&profile).contains("[enrollments.list] SELECT * FROM enrollments"));
    }

    #[test]
    fn test_recommendation_display() {
        let profile = profile_with(&[("SELECT pg_sleep(2)", 2000.0)]);
        let lines = analyze_profile(&profile);
        assert_eq!(lines.len(), 2);
        assert!(format_profile(&profile).contains("Slowest queries"));
        assert!(lines[0].starts_with("[WARNING] Total Time: High total query time"));
        assert!(lines[1].to_lowercase().contains("slow query"));
    }
}
