//! Query normalization and N+1 detection.
//!
//! Queries are grouped by a normalized pattern: lowercased, positional
//! placeholders replaced with `$N`, whitespace collapsed and spacing around
//! operators and inside parentheses removed. A pattern repeated
//! `n1_pattern_threshold` times or more within one request marks the profile
//! as a likely N+1 storm.

use chrono::{DateTime, Utc};
use regex::{NoExpand, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

use super::types::{PatternStat, PerformanceThresholds, QueryProfile, QueryRecord};

/// Canonical token that replaces every placeholder.
pub const PLACEHOLDER: &str = "$N";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\$\d+|\?").expect("Invalid regex"))
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE_REGEX: OnceLock<Regex> = OnceLock::new();
    WHITESPACE_REGEX.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex"))
}

fn operator_spacing_regex() -> &'static Regex {
    static OPERATOR_REGEX: OnceLock<Regex> = OnceLock::new();
    OPERATOR_REGEX.get_or_init(|| Regex::new(r" ?([=<>!,]) ?").expect("Invalid regex"))
}

fn paren_spacing_regex() -> &'static Regex {
    static PAREN_REGEX: OnceLock<Regex> = OnceLock::new();
    PAREN_REGEX.get_or_init(|| Regex::new(r"(\() | (\))").expect("Invalid regex"))
}

fn string_literal_regex() -> &'static Regex {
    static STRING_REGEX: OnceLock<Regex> = OnceLock::new();
    STRING_REGEX.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("Invalid regex"))
}

fn numeric_literal_regex() -> &'static Regex {
    static NUMERIC_REGEX: OnceLock<Regex> = OnceLock::new();
    NUMERIC_REGEX.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("Invalid regex"))
}

/// Normalize query text into the pattern used for grouping.
///
/// `select * from t where id = $1` and `SELECT  *  FROM t WHERE id=$2`
/// produce the same pattern.
pub fn normalize_query(query: &str) -> String {
    normalize(query, false)
}

/// Like [`normalize_query`], but also folds inline literals into `$N` so
/// statements that embed their values group together.
pub fn normalize_query_folding_literals(query: &str) -> String {
    normalize(query, true)
}

pub(crate) fn normalize(query: &str, fold_literals: bool) -> String {
    let mut normalized = placeholder_regex()
        .replace_all(&query.to_lowercase(), NoExpand(PLACEHOLDER))
        .into_owned();

    if fold_literals {
        normalized = string_literal_regex()
            .replace_all(&normalized, NoExpand(PLACEHOLDER))
            .into_owned();
        normalized = numeric_literal_regex()
            .replace_all(&normalized, NoExpand(PLACEHOLDER))
            .into_owned();
    }

    normalized = whitespace_regex().replace_all(&normalized, " ").into_owned();
    normalized = operator_spacing_regex()
        .replace_all(&normalized, "$1")
        .into_owned();
    normalized = paren_spacing_regex()
        .replace_all(&normalized, "${1}${2}")
        .into_owned();

    normalized.trim().to_string()
}

/// Group the records of a finished request and compute its aggregates.
pub fn analyze(
    request_id: String,
    started_at: DateTime<Utc>,
    queries: Vec<QueryRecord>,
    thresholds: PerformanceThresholds,
) -> QueryProfile {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut patterns: Vec<PatternStat> = Vec::new();
    let mut total_duration_ms = 0.0;
    let mut slow_queries = 0;

    for record in &queries {
        total_duration_ms += record.duration_ms;
        if record.duration_ms > thresholds.slow_query_ms {
            slow_queries += 1;
        }

        match index.get(record.query_pattern.as_str()) {
            Some(&i) => {
                patterns[i].occurrences += 1;
                patterns[i].total_duration_ms += record.duration_ms;
            }
            None => {
                index.insert(record.query_pattern.as_str(), patterns.len());
                patterns.push(PatternStat {
                    pattern: record.query_pattern.clone(),
                    occurrences: 1,
                    total_duration_ms: record.duration_ms,
                });
            }
        }
    }

    // Stable sort: equal counts keep first-seen order.
    patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));

    let potential_n1 = patterns
        .first()
        .is_some_and(|p| p.occurrences >= thresholds.n1_pattern_threshold);

    QueryProfile {
        request_id,
        query_count: queries.len(),
        queries,
        started_at,
        finished_at: Utc::now(),
        total_duration_ms,
        slow_queries,
        potential_n1,
        patterns,
        thresholds,
    }
}
