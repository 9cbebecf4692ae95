use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use super::sink::ProfileSink;
use super::types::{ProfileSummary, QueryProfile};

/// Bounded record of recently finished profiles, for the admin surface.
pub struct ProfileHistory {
    entries: RwLock<VecDeque<ProfileSummary>>,
    max_history: usize,
}

/// Aggregates over every profile currently held in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub profiles: usize,
    pub total_queries: usize,
    pub avg_queries_per_request: f64,
    pub slow_queries: usize,
    pub slow_query_percentage: f64,
    pub n1_profiles: usize,
    pub avg_duration_ms: f64,
}

/// A pattern that tripped N+1 detection, across requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct N1Offender {
    pub pattern: String,
    pub profiles: usize,
    pub max_occurrences: usize,
}

impl ProfileHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history: max_history.max(1),
        }
    }

    pub fn push(&self, summary: ProfileSummary) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_history {
            entries.pop_front();
        }
        entries.push_back(summary);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<ProfileSummary> {
        self.entries
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let entries = self.entries.read();
        let profiles = entries.len();
        let total_queries: usize = entries.iter().map(|e| e.query_count).sum();
        let slow_queries: usize = entries.iter().map(|e| e.slow_queries).sum();
        let total_duration_ms: f64 = entries.iter().map(|e| e.total_duration_ms).sum();
        let n1_profiles = entries.iter().filter(|e| e.potential_n1).count();

        HistoryStats {
            profiles,
            total_queries,
            avg_queries_per_request: ratio(total_queries as f64, profiles),
            slow_queries,
            slow_query_percentage: ratio(slow_queries as f64 * 100.0, total_queries),
            n1_profiles,
            avg_duration_ms: ratio(total_duration_ms, profiles),
        }
    }

    /// Patterns flagged as N+1 most often, worst first.
    pub fn n1_offenders(&self, limit: usize) -> Vec<N1Offender> {
        let entries = self.entries.read();
        let mut by_pattern: HashMap<&str, N1Offender> = HashMap::new();

        for summary in entries.iter().filter(|e| e.potential_n1) {
            let Some(top) = summary.top_pattern.as_ref() else {
                continue;
            };
            let offender = by_pattern
                .entry(top.pattern.as_str())
                .or_insert_with(|| N1Offender {
                    pattern: top.pattern.clone(),
                    profiles: 0,
                    max_occurrences: 0,
                });
            offender.profiles += 1;
            offender.max_occurrences = offender.max_occurrences.max(top.occurrences);
        }

        let mut offenders: Vec<N1Offender> = by_pattern.into_values().collect();
        offenders.sort_by(|a, b| {
            b.profiles
                .cmp(&a.profiles)
                .then(b.max_occurrences.cmp(&a.max_occurrences))
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        offenders.truncate(limit);
        offenders
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl ProfileSink for ProfileHistory {
    fn on_finish(&self, profile: &QueryProfile) {
        self.push(profile.summary());
    }
}

fn ratio(numerator: f64, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}
