use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tracing::trace;

use super::analyzer::normalize;
use super::registry::ProfileRegistry;
use super::types::{QueryParam, QueryRecord};

/// Pattern stored for blank query text.
pub const EMPTY_QUERY_PATTERN: &str = "<empty query>";

/// What is known about a query before it runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryContext {
    pub query_text: String,
    pub params: Vec<QueryParam>,
    pub label: Option<String>,
}

impl QueryContext {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            params: Vec::new(),
            label: None,
        }
    }

    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<&str> for QueryContext {
    fn from(query_text: &str) -> Self {
        Self::new(query_text)
    }
}

impl From<String> for QueryContext {
    fn from(query_text: String) -> Self {
        Self::new(query_text)
    }
}

impl ProfileRegistry {
    /// Append one observed call to the in-flight profile of `request_id`.
    ///
    /// Unknown ids are a silent no-op, and so is a profile finished while the
    /// record was being built. Returns whether the record was kept: every
    /// `true` is counted by the profile's eventual `query_count`.
    pub fn record_query(
        &self,
        request_id: &str,
        query_text: &str,
        duration_ms: f64,
        params: Vec<QueryParam>,
    ) -> bool {
        self.record_context(
            request_id,
            QueryContext::new(query_text).with_params(params),
            duration_ms,
        )
    }

    pub fn record_context(&self, request_id: &str, ctx: QueryContext, duration_ms: f64) -> bool {
        let Some(active) = self.active_profile(request_id) else {
            trace!(request_id = %request_id, "Dropping query record for unknown profile");
            return false;
        };

        let record = self.build_record(ctx, duration_ms);
        if !active.push(record) {
            trace!(request_id = %request_id, "Dropping query record for finished profile");
            return false;
        }
        true
    }

    /// Run `fut`, time it and record it against `request_id`.
    ///
    /// The outcome of `fut` is returned untouched. Failed calls are recorded
    /// too, and so is the partial duration when the returned future is
    /// dropped before completion (cancellation, timeouts).
    pub async fn measure_query<F, T, E>(
        &self,
        request_id: &str,
        ctx: impl Into<QueryContext>,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let guard = MeasureGuard {
            registry: self,
            request_id,
            ctx: Some(ctx.into()),
            start: Instant::now(),
        };

        let result = fut.await;
        drop(guard);
        result
    }

    pub(super) fn build_record(&self, ctx: QueryContext, duration_ms: f64) -> QueryRecord {
        let config = self.config();
        let query_pattern = if ctx.query_text.trim().is_empty() {
            EMPTY_QUERY_PATTERN.to_string()
        } else {
            normalize(&ctx.query_text, config.fold_literals)
        };

        QueryRecord {
            query_pattern,
            raw_query: truncate_chars(&ctx.query_text, config.max_raw_query_len),
            params: ctx.params,
            duration_ms: clamp_duration(duration_ms),
            timestamp: Utc::now(),
            label: ctx.label,
        }
    }
}

/// Records the elapsed time when dropped, whether the query finished or not.
struct MeasureGuard<'a> {
    registry: &'a ProfileRegistry,
    request_id: &'a str,
    ctx: Option<QueryContext>,
    start: Instant,
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
            self.registry.record_context(self.request_id, ctx, elapsed_ms);
        }
    }
}

fn clamp_duration(duration_ms: f64) -> f64 {
    if duration_ms.is_finite() && duration_ms > 0.0 {
        duration_ms
    } else {
        0.0
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
