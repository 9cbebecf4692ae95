use std::future::Future;
use tracing::debug;
use uuid::Uuid;

use super::recorder::QueryContext;
use super::registry::ProfileRegistry;
use super::types::QueryProfile;

/// Profiles one request for as long as it is alive.
///
/// Dropping the scope finishes the profile, so early returns, `?` and
/// panics cannot leave an entry behind in the registry. The profile
/// finished by a drop still reaches the registry's sinks.
///
/// A scope only ever finishes the profile it started. If another scope
/// restarts the same id, this one's finish and drop leave the newer
/// profile alone.
pub struct ProfileScope {
    registry: ProfileRegistry,
    request_id: String,
    generation: Option<u64>,
    finished: bool,
}

impl ProfileRegistry {
    /// Start profiling `request_id` and tie the profile to the returned scope.
    pub fn scope(&self, request_id: impl Into<String>) -> ProfileScope {
        let request_id = request_id.into();
        let generation = self.begin(&request_id).map(|(generation, _)| generation);

        ProfileScope {
            registry: self.clone(),
            request_id,
            generation,
            finished: false,
        }
    }

    /// Same as [`scope`](Self::scope) with a freshly generated request id.
    pub fn scope_new(&self) -> ProfileScope {
        self.scope(Uuid::now_v7().to_string())
    }
}

impl ProfileScope {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn record(&self, ctx: impl Into<QueryContext>, duration_ms: f64) -> bool {
        self.registry
            .record_context(&self.request_id, ctx.into(), duration_ms)
    }

    pub async fn measure<F, T, E>(&self, ctx: impl Into<QueryContext>, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.registry.measure_query(&self.request_id, ctx, fut).await
    }

    pub fn finish(mut self) -> Option<QueryProfile> {
        self.finished = true;
        self.finish_own()
    }

    fn finish_own(&self) -> Option<QueryProfile> {
        let generation = self.generation?;
        self.registry.finish_generation(&self.request_id, generation)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(profile) = self.finish_own() {
            debug!(
                request_id = %profile.request_id,
                query_count = profile.query_count,
                "Profile scope dropped without explicit finish"
            );
        }
    }
}
