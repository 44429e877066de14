//! Score cache -- avoids re-running the full dimension scan for prompts
//! (or near-duplicates) seen recently, and carries enough boundary context
//! for the orchestrator to decide when a fresh classification that moved
//! only slightly should still honor the cached tier.
//!
//! Two independent mechanisms live here, both guarding against the same
//! underlying problem (a fingerprint's score wobbling around a tier
//! boundary) from different angles:
//!
//! - jitter-lock: if the last few tier assignments for a fingerprint show
//!   one tier dominating, `get` substitutes that tier back in on a hit,
//!   clamping confidence up so the caller doesn't see an artificially low
//!   score for a decision it isn't actually making.
//! - fuzzy-boundary honoring: [`Self::should_use_cached_tier`] is a pure
//!   function of the cached entry and a freshly-computed score/tier, for
//!   callers that want to decide per-request whether a new tier that
//!   didn't clear its boundary by much should override the cached one.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use routecraft_types::Tier;

const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const JITTER_WINDOW: usize = 5;
const JITTER_THRESHOLD: usize = 3;
const JITTER_LOCK_MIN_CONFIDENCE: f64 = 0.7;

/// Half-width of the zone around a tier boundary within which a changed
/// tier is still considered "close enough" to the cached one to honor the
/// cached value instead.
pub const FUZZY_BOUNDARY_WIDTH: f64 = 0.05;

/// A previously-computed classification, keyed by fingerprint digest.
#[derive(Debug, Clone)]
pub struct CachedScore {
    pub tier: Tier,
    pub confidence: f64,
    pub weighted_score: f64,
    /// Absolute distance from `weighted_score` to the nearest configured
    /// tier boundary at the time this entry was written.
    pub distance_to_boundary: f64,
    /// Which boundary `distance_to_boundary` was measured against, e.g.
    /// `"b2"` for the `MEDIUM`/`COMPLEX` cut point.
    pub boundary_name: String,
    inserted_at: Instant,
    last_accessed: Instant,
}

struct Entry {
    score: CachedScore,
}

/// LRU+TTL cache of classification results, plus a short per-fingerprint
/// tier-history window used to detect jitter lock.
pub struct ScoreCache {
    entries: RwLock<HashMap<String, Entry>>,
    recent_tiers: RwLock<HashMap<String, VecDeque<Tier>>>,
    max_size: usize,
    ttl: Duration,
}

impl ScoreCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }

    pub fn with_capacity(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            recent_tiers: RwLock::new(HashMap::new()),
            max_size,
            ttl,
        }
    }

    /// Look up a cached score, returning `None` on a miss or an expired
    /// entry (which is evicted as a side effect). When jitter lock is
    /// engaged for this digest and disagrees with the stored tier, the
    /// locked tier is substituted in and confidence is floored at
    /// [`JITTER_LOCK_MIN_CONFIDENCE`], since the cache is now reporting a
    /// decision that was voted on, not the single classification that
    /// happened to be stored last.
    pub fn get(&self, digest: &str) -> Option<CachedScore> {
        let mut entries = self.entries.write().unwrap();
        let expired = match entries.get(digest) {
            Some(e) => e.score.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(digest);
            tracing::debug!(digest, "score cache entry expired");
            return None;
        }
        let entry = entries.get_mut(digest).unwrap();
        entry.score.last_accessed = Instant::now();
        let mut score = entry.score.clone();
        drop(entries);

        if let Some(locked) = self.jitter_lock(digest) {
            if locked != score.tier {
                tracing::debug!(digest, tier = %locked, "jitter lock substituted into cache hit");
                score.tier = locked;
                score.confidence = score.confidence.max(JITTER_LOCK_MIN_CONFIDENCE);
            }
        }
        tracing::debug!(digest, tier = %score.tier, "score cache hit");
        Some(score)
    }

    /// Insert or refresh a classification result, evicting the
    /// least-recently-accessed entry if this insert would exceed
    /// `max_size`. `boundaries` are the tier cut points active when this
    /// score was computed, used to derive `distance_to_boundary` /
    /// `boundary_name`.
    pub fn set(
        &self,
        digest: &str,
        tier: Tier,
        confidence: f64,
        weighted_score: f64,
        boundaries: (f64, f64, f64),
    ) {
        let (distance_to_boundary, boundary_name) = nearest_boundary(weighted_score, boundaries);
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();
        if !entries.contains_key(digest) && entries.len() >= self.max_size {
            self.evict_lru(&mut entries);
        }
        entries.insert(
            digest.to_string(),
            Entry {
                score: CachedScore {
                    tier,
                    confidence,
                    weighted_score,
                    distance_to_boundary,
                    boundary_name,
                    inserted_at: now,
                    last_accessed: now,
                },
            },
        );
        drop(entries);
        self.push_recent_tier(digest, tier);
    }

    fn evict_lru(&self, entries: &mut HashMap<String, Entry>) {
        if let Some(key) = entries
            .iter()
            .min_by_key(|(_, e)| e.score.last_accessed)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&key);
        }
    }

    fn push_recent_tier(&self, digest: &str, tier: Tier) {
        let mut recent = self.recent_tiers.write().unwrap();
        let window = recent.entry(digest.to_string()).or_default();
        window.push_back(tier);
        while window.len() > JITTER_WINDOW {
            window.pop_front();
        }
    }

    /// If this fingerprint's last few tier assignments show one tier
    /// dominating (at least `JITTER_THRESHOLD` of the last
    /// `JITTER_WINDOW`), return it so `get` can pin the decision instead of
    /// honoring a single noisy classification.
    fn jitter_lock(&self, digest: &str) -> Option<Tier> {
        let recent = self.recent_tiers.read().unwrap();
        let window = recent.get(digest)?;
        if window.len() < JITTER_WINDOW {
            return None;
        }
        let mut counts: HashMap<Tier, usize> = HashMap::new();
        for tier in window {
            *counts.entry(*tier).or_insert(0) += 1;
        }
        let (top_tier, top_count) = counts.into_iter().max_by_key(|(_, c)| *c)?;
        if top_count >= JITTER_THRESHOLD {
            tracing::debug!(digest, tier = %top_tier, count = top_count, "jitter lock engaged");
            Some(top_tier)
        } else {
            None
        }
    }

    /// Whether a fresh classification that disagrees with a cached entry
    /// should still be overridden by the cached tier: true when the tiers
    /// differ and the cached entry sat within [`FUZZY_BOUNDARY_WIDTH`] of
    /// the boundary it was measured against, meaning the new score likely
    /// just nudged across a line the cached score was already hugging.
    pub fn should_use_cached_tier(cached: &CachedScore, new_score: f64, new_tier: Tier) -> bool {
        let _ = new_score;
        new_tier != cached.tier && cached.distance_to_boundary < FUZZY_BOUNDARY_WIDTH
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
        self.recent_tiers.write().unwrap().clear();
    }
}

fn nearest_boundary(score: f64, boundaries: (f64, f64, f64)) -> (f64, String) {
    let (b1, b2, b3) = boundaries;
    [("b1", b1), ("b2", b2), ("b3", b3)]
        .into_iter()
        .map(|(name, b)| ((score - b).abs(), name.to_string()))
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
        .expect("three boundaries always yield a minimum")
}

impl Default for ScoreCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARIES: (f64, f64, f64) = (0.0, 0.18, 0.40);

    #[test]
    fn hit_after_set() {
        let cache = ScoreCache::new();
        cache.set("abc", Tier::Medium, 0.8, 0.2, BOUNDARIES);
        let hit = cache.get("abc").unwrap();
        assert_eq!(hit.tier, Tier::Medium);
    }

    #[test]
    fn miss_on_unknown_digest() {
        let cache = ScoreCache::new();
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn evicts_least_recently_used_when_full() {
        let cache = ScoreCache::with_capacity(2, DEFAULT_TTL);
        cache.set("a", Tier::Simple, 0.9, -0.5, BOUNDARIES);
        cache.set("b", Tier::Simple, 0.9, -0.5, BOUNDARIES);
        // touch "a" so "b" becomes the LRU entry
        cache.get("a");
        cache.set("c", Tier::Simple, 0.9, -0.5, BOUNDARIES);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn distance_and_boundary_name_are_recorded() {
        let cache = ScoreCache::new();
        cache.set("abc", Tier::Medium, 0.8, 0.19, BOUNDARIES);
        let hit = cache.get("abc").unwrap();
        assert!((hit.distance_to_boundary - 0.01).abs() < 1e-9);
        assert_eq!(hit.boundary_name, "b2");
    }

    #[test]
    fn jitter_lock_substitutes_tier_on_get() {
        let cache = ScoreCache::new();
        for tier in [Tier::Medium, Tier::Complex, Tier::Medium, Tier::Medium, Tier::Complex] {
            cache.set("flap", tier, 0.6, 0.2, BOUNDARIES);
        }
        let hit = cache.get("flap").unwrap();
        assert_eq!(hit.tier, Tier::Medium);
        assert!(hit.confidence >= JITTER_LOCK_MIN_CONFIDENCE);
    }

    #[test]
    fn no_jitter_lock_before_window_fills() {
        let cache = ScoreCache::new();
        cache.set("fresh", Tier::Medium, 0.6, 0.2, BOUNDARIES);
        let hit = cache.get("fresh").unwrap();
        assert_eq!(hit.tier, Tier::Medium);
    }

    #[test]
    fn should_use_cached_tier_honors_close_boundary() {
        let cache = ScoreCache::new();
        cache.set("near", Tier::Medium, 0.6, 0.19, BOUNDARIES);
        let cached = cache.get("near").unwrap();
        assert!(ScoreCache::should_use_cached_tier(&cached, 0.21, Tier::Complex));
    }

    #[test]
    fn should_use_cached_tier_ignores_far_boundary() {
        let cache = ScoreCache::new();
        cache.set("far", Tier::Medium, 0.6, 0.05, BOUNDARIES);
        let cached = cache.get("far").unwrap();
        assert!(!ScoreCache::should_use_cached_tier(&cached, 0.41, Tier::Complex));
    }

    #[test]
    fn should_use_cached_tier_false_when_tiers_match() {
        let cache = ScoreCache::new();
        cache.set("same", Tier::Medium, 0.6, 0.19, BOUNDARIES);
        let cached = cache.get("same").unwrap();
        assert!(!ScoreCache::should_use_cached_tier(&cached, 0.19, Tier::Medium));
    }

    #[test]
    fn clear_empties_both_maps() {
        let cache = ScoreCache::new();
        cache.set("a", Tier::Simple, 0.9, -0.5, BOUNDARIES);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
