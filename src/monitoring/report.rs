use tracing::{debug, warn};

use crate::profiler::{format_profile, recommendations, ProfileSink, QueryProfile};

/// Writes every finished profile to the log.
///
/// Profiles that trip a recommendation are logged at `warn`, one event per
/// recommendation, the rest at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProfileSink for LogSink {
    fn on_finish(&self, profile: &QueryProfile) {
        let findings = recommendations(profile);

        if findings.is_empty() {
            debug!(
                request_id = %profile.request_id,
                query_count = profile.query_count,
                total_duration_ms = profile.total_duration_ms,
                "Request profile finished"
            );
            return;
        }

        warn!(
            request_id = %profile.request_id,
            query_count = profile.query_count,
            total_duration_ms = profile.total_duration_ms,
            slow_queries = profile.slow_queries,
            potential_n1 = profile.potential_n1,
            "Request profile needs attention\n{}",
            format_profile(profile)
        );

        for finding in findings {
            warn!(
                request_id = %profile.request_id,
                severity = %finding.severity,
                "{}",
                finding
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::{analyze, normalize_query, PerformanceThresholds, QueryRecord};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Level and field names of one emitted event.
    #[derive(Debug)]
    struct Captured {
        level: Level,
        fields: Vec<String>,
    }

    #[derive(Default)]
    struct FieldNames(Vec<String>);

    impl Visit for FieldNames {
        fn record_debug(&mut self, field: &Field, _value: &dyn std::fmt::Debug) {
            self.0.push(field.name().to_string());
        }
    }

    #[derive(Clone, Default)]
    struct CaptureLayer {
        events: Arc<Mutex<Vec<Captured>>>,
    }

    impl<S: Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = FieldNames::default();
            event.record(&mut fields);
            self.events.lock().push(Captured {
                level: *event.metadata().level(),
                fields: fields.0,
            });
        }
    }

    fn capture(profile: &QueryProfile) -> Vec<Captured> {
        let layer = CaptureLayer::default();
        let events = Arc::clone(&layer.events);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || LogSink.on_finish(profile));

        let captured = std::mem::take(&mut *events.lock());
        captured
    }

    fn profile_with(query: &str, repeats: usize, duration_ms: f64) -> QueryProfile {
        let records = (0..repeats)
            .map(|_| QueryRecord {
                query_pattern: normalize_query(query),
                raw_query: query.to_string(),
                params: Vec::new(),
                duration_ms,
                timestamp: Utc::now(),
                label: None,
            })
            .collect();
        analyze(
            "req-log".to_string(),
            Utc::now(),
            records,
            PerformanceThresholds::default(),
        )
    }

    #[test]
    fn test_quiet_profile_logs_one_debug_event() {
        let profile = profile_with("SELECT 1", 1, 1.0);
        let events = capture(&profile);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::DEBUG);
        assert!(events[0].fields.iter().any(|f| f == "query_count"));
    }

    #[test]
    fn test_noisy_profile_logs_summary_and_each_recommendation() {
        let profile = profile_with("SELECT * FROM t WHERE id = $1", 12, 5.0);
        assert!(profile.potential_n1);
        let expected = recommendations(&profile).len();
        assert_eq!(expected, 1);

        let events = capture(&profile);
        assert_eq!(events.len(), 1 + expected);
        assert!(events.iter().all(|e| e.level == Level::WARN));

        assert!(events[0].fields.iter().any(|f| f == "potential_n1"));
        let per_recommendation = events
            .iter()
            .filter(|e| e.fields.iter().any(|f| f == "severity"))
            .count();
        assert_eq!(per_recommendation, expected);
    }

    #[test]
    fn test_every_fired_check_gets_its_own_event() {
        let mut records = profile_with("SELECT * FROM lessons WHERE id = $1", 55, 1.0).queries;
        records.extend(profile_with("SELECT * FROM enrollments", 1, 1200.0).queries);
        let profile = analyze(
            "req-log".to_string(),
            Utc::now(),
            records,
            PerformanceThresholds::default(),
        );
        assert_eq!(recommendations(&profile).len(), 4);

        let events = capture(&profile);
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.level == Level::WARN));
    }
}
