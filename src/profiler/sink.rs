use super::types::QueryProfile;

/// Receives every profile finished through a [`ProfileRegistry`].
///
/// Sinks run synchronously on the finishing thread and must not block or
/// panic.
///
/// [`ProfileRegistry`]: super::ProfileRegistry
pub trait ProfileSink: Send + Sync {
    fn on_finish(&self, profile: &QueryProfile);
}

impl<F> ProfileSink for F
where
    F: Fn(&QueryProfile) + Send + Sync,
{
    fn on_finish(&self, profile: &QueryProfile) {
        self(profile)
    }
}
