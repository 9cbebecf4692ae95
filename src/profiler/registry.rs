use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::analyzer::analyze;
use super::sink::ProfileSink;
use super::types::{PerformanceThresholds, QueryProfile, QueryRecord};
use crate::config::ProfilerConfig;

/// In-flight profile. Records are only ever appended.
///
/// The buffer is `None` once the profile has been finalized. A recorder
/// holding a stale handle sees the closed buffer and rejects its record.
pub(super) struct ActiveProfile {
    generation: u64,
    started_at: DateTime<Utc>,
    queries: Mutex<Option<Vec<QueryRecord>>>,
}

impl ActiveProfile {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            started_at: Utc::now(),
            queries: Mutex::new(Some(Vec::new())),
        }
    }

    /// Append `record` unless the profile is already closed.
    pub(super) fn push(&self, record: QueryRecord) -> bool {
        match self.queries.lock().as_mut() {
            Some(queries) => {
                queries.push(record);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.queries.lock().as_ref().map_or(0, Vec::len)
    }

    /// Take every accepted record and refuse any further ones.
    fn close(&self) -> Vec<QueryRecord> {
        self.queries.lock().take().unwrap_or_default()
    }
}

struct RegistryInner {
    profiles: DashMap<String, Arc<ActiveProfile>>,
    next_generation: AtomicU64,
    config: ProfilerConfig,
    sinks: RwLock<Vec<Arc<dyn ProfileSink>>>,
}

/// Owns every in-flight profile, keyed by request id.
///
/// Cloning is cheap and clones share state. Different request ids live in
/// different map shards and each profile has its own lock, so concurrent
/// requests do not contend with each other.
#[derive(Clone)]
pub struct ProfileRegistry {
    inner: Arc<RegistryInner>,
}

impl ProfileRegistry {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                profiles: DashMap::new(),
                next_generation: AtomicU64::new(0),
                config,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.inner.config
    }

    pub fn thresholds(&self) -> PerformanceThresholds {
        self.inner.config.thresholds
    }

    /// Register a sink notified of every profile finished from now on.
    pub fn add_sink(&self, sink: Arc<dyn ProfileSink>) {
        self.inner.sinks.write().push(sink);
    }

    /// Begin profiling `request_id`.
    ///
    /// If a profile for the same id is already in flight it is replaced. The
    /// displaced profile is finalized, handed to the sinks and returned.
    /// An empty id is ignored.
    pub fn start_profiling(&self, request_id: &str) -> Option<QueryProfile> {
        self.begin(request_id).and_then(|(_, displaced)| displaced)
    }

    /// Start a profile and return its generation with any displaced profile.
    ///
    /// The generation lets an owner finish exactly the profile it started,
    /// even after a restart reused the id.
    pub(super) fn begin(&self, request_id: &str) -> Option<(u64, Option<QueryProfile>)> {
        if request_id.is_empty() {
            warn!("Ignoring profiling start with empty request id");
            return None;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let displaced = self
            .inner
            .profiles
            .insert(request_id.to_string(), Arc::new(ActiveProfile::new(generation)))
            .map(|displaced| {
                warn!(
                    request_id = %request_id,
                    discarded_queries = displaced.len(),
                    "Profiling restarted for an in-flight request, previous profile finalized"
                );
                self.finalize(request_id.to_string(), displaced)
            });

        Some((generation, displaced))
    }

    /// Stop profiling `request_id` and return its analysed profile.
    ///
    /// Returns `None` if the id was never started or is already finished.
    /// When several callers race on one id, exactly one gets the profile.
    pub fn finish_profiling(&self, request_id: &str) -> Option<QueryProfile> {
        let Some((request_id, active)) = self.inner.profiles.remove(request_id) else {
            debug!(request_id = %request_id, "Finish requested for unknown profile");
            return None;
        };

        Some(self.finalize(request_id, active))
    }

    /// Finish `request_id` only if it is still the profile of `generation`.
    pub(super) fn finish_generation(
        &self,
        request_id: &str,
        generation: u64,
    ) -> Option<QueryProfile> {
        let Some((request_id, active)) = self
            .inner
            .profiles
            .remove_if(request_id, |_, active| active.generation == generation)
        else {
            debug!(
                request_id = %request_id,
                generation,
                "Profile already finished or restarted by another owner"
            );
            return None;
        };

        Some(self.finalize(request_id, active))
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.inner.profiles.contains_key(request_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.profiles.len()
    }

    pub fn active_request_ids(&self) -> Vec<String> {
        self.inner
            .profiles
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub(super) fn active_profile(&self, request_id: &str) -> Option<Arc<ActiveProfile>> {
        self.inner
            .profiles
            .get(request_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn finalize(&self, request_id: String, active: Arc<ActiveProfile>) -> QueryProfile {
        // Recorders still holding the Arc are turned away from here on.
        let queries = active.close();
        let profile = analyze(
            request_id,
            active.started_at,
            queries,
            self.inner.config.thresholds,
        );

        let sinks = self.inner.sinks.read().clone();
        for sink in &sinks {
            sink.on_finish(&profile);
        }

        profile
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}
