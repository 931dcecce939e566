//! Session Resolver (spec §4.8): one persistent `(session_id, provider,
//! last_used, error_count)` per `feature_id`. Helper sessions share the same
//! map as primary task sessions, distinguished only by the `helper:` key
//! prefix `validation::helper_agent::helper_feature_id` builds.

use chrono::Utc;
use std::collections::HashMap;

use crate::dispatcher::Provider;
use crate::state::{ActiveSession, FeatureId};

const DEFAULT_ERROR_THRESHOLD: u32 = 3;

pub struct SessionResolver {
    error_threshold: u32,
}

impl SessionResolver {
    pub fn new(error_threshold: u32) -> Self {
        SessionResolver { error_threshold }
    }
}

impl Default for SessionResolver {
    fn default() -> Self {
        SessionResolver::new(DEFAULT_ERROR_THRESHOLD)
    }
}

impl SessionResolver {
    /// Returns the currently bound session id for `feature_id`, if any and
    /// not yet evicted.
    pub fn lookup<'a>(
        &self,
        sessions: &'a HashMap<FeatureId, ActiveSession>,
        feature_id: &str,
    ) -> Option<&'a ActiveSession> {
        sessions.get(feature_id)
    }

    /// Records a successful dispatch: rotates in a new session id when the
    /// provider returned one, resets `error_count`.
    pub fn record_success(
        &self,
        sessions: &mut HashMap<FeatureId, ActiveSession>,
        feature_id: &str,
        provider: Provider,
        new_session_id: Option<&str>,
    ) {
        let entry = sessions
            .entry(feature_id.to_string())
            .or_insert_with(|| ActiveSession {
                session_id: new_session_id.unwrap_or_default().to_string(),
                provider: provider.name().to_string(),
                last_used: Utc::now(),
                error_count: 0,
            });
        if let Some(id) = new_session_id {
            entry.session_id = id.to_string();
        }
        entry.provider = provider.name().to_string();
        entry.last_used = Utc::now();
        entry.error_count = 0;
    }

    /// Records a failed dispatch: bumps `error_count`; evicts the session
    /// entirely once it crosses `error_threshold`.
    pub fn record_failure(&self, sessions: &mut HashMap<FeatureId, ActiveSession>, feature_id: &str) {
        let evict = match sessions.get_mut(feature_id) {
            Some(entry) => {
                entry.error_count += 1;
                entry.error_count >= self.error_threshold
            }
            None => false,
        };
        if evict {
            sessions.remove(feature_id);
        }
    }

    pub fn invalidate(&self, sessions: &mut HashMap<FeatureId, ActiveSession>, feature_id: &str) {
        sessions.remove(feature_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_success_creates_and_rotates_session() {
        let resolver = SessionResolver::default();
        let mut sessions = HashMap::new();
        resolver.record_success(&mut sessions, "feature-1", Provider::Gemini, Some("sess-a"));
        assert_eq!(sessions["feature-1"].session_id, "sess-a");
        resolver.record_success(&mut sessions, "feature-1", Provider::Gemini, Some("sess-b"));
        assert_eq!(sessions["feature-1"].session_id, "sess-b");
        assert_eq!(sessions["feature-1"].error_count, 0);
    }

    #[test]
    fn record_failure_evicts_at_threshold() {
        let resolver = SessionResolver::new(3);
        let mut sessions = HashMap::new();
        resolver.record_success(&mut sessions, "feature-1", Provider::Claude, Some("sess-a"));
        resolver.record_failure(&mut sessions, "feature-1");
        resolver.record_failure(&mut sessions, "feature-1");
        assert!(sessions.contains_key("feature-1"));
        resolver.record_failure(&mut sessions, "feature-1");
        assert!(!sessions.contains_key("feature-1"));
    }

    #[test]
    fn helper_and_primary_sessions_share_the_map_by_prefix() {
        let resolver = SessionResolver::default();
        let mut sessions = HashMap::new();
        resolver.record_success(&mut sessions, "feature-1", Provider::Gemini, Some("primary"));
        resolver.record_success(
            &mut sessions,
            &crate::validation::helper_agent::helper_feature_id("proj"),
            Provider::Claude,
            Some("helper"),
        );
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions["helper:validation:proj"].session_id, "helper");
    }
}
