//! Session store -- pins a model to a conversation so follow-up turns in
//! the same thread don't jump between models mid-conversation, while
//! still tracking enough rolling context to detect when a pinned model is
//! struggling and should be let go.
//!
//! This is process-local, in-memory state (not the disk-persisted,
//! turn-by-turn conversation log a chat UI would keep) -- it exists only
//! to answer "what model, if any, is this conversation already committed
//! to?"

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use routecraft_types::{ObservedOutcome, Tier};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_RECENT_TOPICS: usize = 10;
const CONTEXT_ALPHA: f64 = 0.3;
/// Consecutive failures on a pinned model after which the session is
/// marked degraded and should be re-classified on its next turn.
const DEGRADE_AFTER_FAILURES: u32 = 3;
/// Consecutive successes after degradation needed to re-pin the model.
const RECOVER_AFTER_SUCCESSES: u32 = 2;

#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub recent_topics: VecDeque<String>,
    pub complexity_trend: f64,
    pub avg_response_length: f64,
}

impl ContextSnapshot {
    fn push_topic(&mut self, topic: String) {
        self.recent_topics.push_back(topic);
        while self.recent_topics.len() > MAX_RECENT_TOPICS {
            self.recent_topics.pop_front();
        }
    }

    fn update_trend(&mut self, complexity: f64, response_len: u32) {
        self.complexity_trend = CONTEXT_ALPHA * complexity + (1.0 - CONTEXT_ALPHA) * self.complexity_trend;
        self.avg_response_length =
            CONTEXT_ALPHA * response_len as f64 + (1.0 - CONTEXT_ALPHA) * self.avg_response_length;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Degradation {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub is_degraded: bool,
}

impl Degradation {
    /// Update failure/success counters. Returns `true` exactly once --
    /// the call where a degraded session's consecutive successes reach
    /// `RECOVER_AFTER_SUCCESSES` -- signaling the caller should attempt
    /// restoration rather than clearing `is_degraded` unconditionally.
    fn record(&mut self, success: bool) -> bool {
        if success {
            self.consecutive_failures = 0;
            if self.is_degraded {
                self.consecutive_successes += 1;
                return self.consecutive_successes >= RECOVER_AFTER_SUCCESSES;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= DEGRADE_AFTER_FAILURES {
                self.is_degraded = true;
            }
        }
        false
    }
}

struct SessionEntry {
    pinned_tier: Tier,
    pinned_model: String,
    /// The model/tier this session was pinned to before the current
    /// degradation episode, if any -- populated exactly once per episode
    /// by `reassign_during_degradation` and cleared on restoration.
    original_model: Option<String>,
    original_tier: Option<Tier>,
    context: ContextSnapshot,
    degradation: Degradation,
    last_active: Instant,
}

/// Read-only view returned from `get_session`.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub pinned_tier: Tier,
    pub pinned_model: String,
    pub context: ContextSnapshot,
    pub is_degraded: bool,
}

/// In-memory, per-session model pin and rolling context.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    last_sweep: RwLock<Instant>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            last_sweep: RwLock::new(Instant::now()),
            timeout,
        }
    }

    /// Fetch the current pin and context for a session, if one exists and
    /// has not expired.
    pub fn get_session(&self, session_id: &str) -> Option<SessionView> {
        self.maybe_sweep();
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).map(|e| SessionView {
            pinned_tier: e.pinned_tier,
            pinned_model: e.pinned_model.clone(),
            context: e.context.clone(),
            is_degraded: e.degradation.is_degraded,
        })
    }

    /// Pin a fresh model/tier to a session -- used for a brand-new session
    /// or a non-degraded re-pin. Starts a clean slate with no pending
    /// degradation episode.
    pub fn set_session(&self, session_id: &str, tier: Tier, model: &str) {
        let mut sessions = self.sessions.write().unwrap();
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| SessionEntry {
            pinned_tier: tier,
            pinned_model: model.to_string(),
            original_model: None,
            original_tier: None,
            context: ContextSnapshot::default(),
            degradation: Degradation::default(),
            last_active: Instant::now(),
        });
        entry.pinned_tier = tier;
        entry.pinned_model = model.to_string();
        entry.last_active = Instant::now();
    }

    /// Override a degraded session's pin with a healthier candidate.
    /// Records the pre-degradation model/tier the first time this is
    /// called for the current episode (I4: populated exactly once), so a
    /// later recovery can restore it.
    pub fn reassign_during_degradation(&self, session_id: &str, tier: Tier, model: &str) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            if entry.original_model.is_none() {
                entry.original_model = Some(entry.pinned_model.clone());
                entry.original_tier = Some(entry.pinned_tier);
            }
            entry.pinned_tier = tier;
            entry.pinned_model = model.to_string();
            entry.last_active = Instant::now();
        }
    }

    /// Record the result of a turn routed through this session's pinned
    /// model, updating rolling context and the degradation counters. When
    /// a degraded session has just accumulated enough consecutive
    /// successes to be eligible for recovery, `original_available` is
    /// called with the pre-degradation model name (only if one was
    /// recorded) to decide whether restoration can proceed, per spec
    /// section 4.6's "if the original model is available, restore
    /// model+tier and clear degradation."
    pub fn record_result(
        &self,
        session_id: &str,
        outcome: &ObservedOutcome,
        topic: Option<&str>,
        complexity: f64,
        original_available: impl FnOnce(&str) -> bool,
    ) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_active = Instant::now();
            if let Some(topic) = topic {
                entry.context.push_topic(topic.to_string());
            }
            let response_len = outcome.output_tokens.unwrap_or(0);
            entry.context.update_trend(complexity, response_len);

            let was_degraded = entry.degradation.is_degraded;
            let ready_to_restore = entry.degradation.record(outcome.success);

            if ready_to_restore {
                let can_restore = match entry.original_model.as_deref() {
                    Some(model) => original_available(model),
                    None => true,
                };
                if can_restore {
                    if let (Some(model), Some(tier)) =
                        (entry.original_model.take(), entry.original_tier.take())
                    {
                        entry.pinned_model = model;
                        entry.pinned_tier = tier;
                    }
                    entry.degradation.is_degraded = false;
                    entry.degradation.consecutive_successes = 0;
                    tracing::warn!(session_id, model = entry.pinned_model.as_str(), "session pin restored");
                }
            }
            if !was_degraded && entry.degradation.is_degraded {
                tracing::warn!(session_id, model = entry.pinned_model.as_str(), "session pin degraded");
            }
        }
    }

    pub fn invalidate(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_sweep(&self) {
        let should_sweep = {
            let last = *self.last_sweep.read().unwrap();
            last.elapsed() >= SWEEP_INTERVAL
        };
        if !should_sweep {
            return;
        }
        *self.last_sweep.write().unwrap() = Instant::now();
        let timeout = self.timeout;
        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        sessions.retain(|_, e| e.last_active.elapsed() < timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "session sweep evicted expired sessions");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecraft_types::ErrorKind;

    #[test]
    fn unknown_session_returns_none() {
        let store = SessionStore::new();
        assert!(store.get_session("nope").is_none());
    }

    #[test]
    fn set_then_get_returns_the_pin() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Complex, "gemini-2.5-pro");
        let view = store.get_session("s1").unwrap();
        assert_eq!(view.pinned_tier, Tier::Complex);
        assert_eq!(view.pinned_model, "gemini-2.5-pro");
    }

    #[test]
    fn repeated_failures_degrade_the_session() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Medium, "grok-code-fast-1");
        for _ in 0..DEGRADE_AFTER_FAILURES {
            store.record_result("s1", &ObservedOutcome::failure(ErrorKind::Server5xx), None, 0.5, |_| true);
        }
        assert!(store.get_session("s1").unwrap().is_degraded);
    }

    #[test]
    fn recovery_after_enough_successes() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Medium, "grok-code-fast-1");
        for _ in 0..DEGRADE_AFTER_FAILURES {
            store.record_result("s1", &ObservedOutcome::failure(ErrorKind::Timeout), None, 0.5, |_| true);
        }
        assert!(store.get_session("s1").unwrap().is_degraded);
        for _ in 0..RECOVER_AFTER_SUCCESSES {
            store.record_result("s1", &ObservedOutcome::success(100), None, 0.5, |_| true);
        }
        assert!(!store.get_session("s1").unwrap().is_degraded);
    }

    #[test]
    fn degraded_session_restores_original_model_when_available_again() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Medium, "orig-model");
        for _ in 0..DEGRADE_AFTER_FAILURES {
            store.record_result("s1", &ObservedOutcome::failure(ErrorKind::Server5xx), None, 0.5, |_| true);
        }
        assert!(store.get_session("s1").unwrap().is_degraded);

        store.reassign_during_degradation("s1", Tier::Medium, "fallback-model");
        assert_eq!(store.get_session("s1").unwrap().pinned_model, "fallback-model");

        for _ in 0..RECOVER_AFTER_SUCCESSES {
            store.record_result("s1", &ObservedOutcome::success(100), None, 0.5, |_| true);
        }
        let view = store.get_session("s1").unwrap();
        assert!(!view.is_degraded);
        assert_eq!(view.pinned_model, "orig-model");
    }

    #[test]
    fn restoration_skipped_when_original_model_still_unavailable() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Medium, "orig-model");
        for _ in 0..DEGRADE_AFTER_FAILURES {
            store.record_result("s1", &ObservedOutcome::failure(ErrorKind::Timeout), None, 0.5, |_| true);
        }
        store.reassign_during_degradation("s1", Tier::Medium, "fallback-model");

        for _ in 0..RECOVER_AFTER_SUCCESSES {
            store.record_result("s1", &ObservedOutcome::success(100), None, 0.5, |_| false);
        }
        let view = store.get_session("s1").unwrap();
        assert!(view.is_degraded);
        assert_eq!(view.pinned_model, "fallback-model");
    }

    #[test]
    fn reassign_during_degradation_records_original_only_once() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Medium, "orig-model");
        store.reassign_during_degradation("s1", Tier::Complex, "fallback-1");
        store.reassign_during_degradation("s1", Tier::Complex, "fallback-2");

        let sessions = store.sessions.read().unwrap();
        let entry = sessions.get("s1").unwrap();
        assert_eq!(entry.pinned_model, "fallback-2");
        assert_eq!(entry.original_model.as_deref(), Some("orig-model"));
    }

    #[test]
    fn recent_topics_bounded_to_ten() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Simple, "gemini-2.5-flash");
        for i in 0..15 {
            store.record_result("s1", &ObservedOutcome::success(10), Some(&format!("topic-{i}")), 0.2, |_| true);
        }
        let view = store.get_session("s1").unwrap();
        assert_eq!(view.context.recent_topics.len(), 10);
        assert_eq!(view.context.recent_topics.front().unwrap(), "topic-5");
    }

    #[test]
    fn invalidate_removes_the_session() {
        let store = SessionStore::new();
        store.set_session("s1", Tier::Simple, "gemini-2.5-flash");
        store.invalidate("s1");
        assert!(store.get_session("s1").is_none());
    }
}
