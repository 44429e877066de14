//! The rule classifier -- fifteen independently-scored dimensions combined
//! into a weighted difficulty estimate, with hysteresis at tier boundaries
//! and a keyword override that can force `REASONING` outright.
//!
//! Each dimension produces a discrete `[-1, 1]` score from a fixed
//! threshold table (see `score_dimensions`), not a continuous count. They
//! are combined with the configured weights into one weighted score, which
//! is then mapped onto a [`Tier`] using the configured boundaries. A small
//! band around each boundary is treated as a fuzzy zone: requests landing
//! there keep whichever tier this exact prompt shape was assigned last
//! time, rather than flapping between two tiers on score noise alone (a
//! Schmitt trigger, the same pattern a hardware debounce circuit uses).
//! Outside the fuzzy zone, a transition away from the prior tier is only
//! honored once the score clears the relevant boundary by the fuzzy width
//! in the direction of travel, so a single noisy call can't flip a tier
//! back and forth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use routecraft_types::{ScoringConfig, Tier};

use crate::fingerprint::Fingerprint;

/// Half-width of the fuzzy zone around each tier boundary, in weighted-score
/// units.
const FUZZY_BAND: f64 = 0.05;

/// Soft cap on the number of fingerprints tracked in `score_history`.
const HISTORY_SOFT_CAP: usize = 1000;

/// Entries older than this are eligible for eviction during cleanup.
const HISTORY_TTL: Duration = Duration::from_secs(5 * 60);

/// One dimension's contribution to the overall score.
#[derive(Debug, Clone)]
pub struct DimensionScore {
    pub name: &'static str,
    /// Discrete `[-1, 1]` score before weighting.
    pub raw: f64,
    /// Weight applied (from `ScoringConfig::dimension_weights`).
    pub weight: f64,
}

/// The classifier's full verdict for one prompt.
#[derive(Debug, Clone)]
pub struct ScoringResult {
    pub weighted_score: f64,
    pub dimension_scores: Vec<DimensionScore>,
    pub tier: Tier,
    pub confidence: f64,
    /// `true` when confidence fell below the configured threshold -- the
    /// orchestrator is expected to apply `Overrides::ambiguous_default_tier`
    /// in this case.
    pub is_ambiguous: bool,
    /// `true` when the reasoning-keyword override fired and forced
    /// `REASONING`, bypassing both weighting and hysteresis.
    pub reasoning_override: bool,
    /// Out-of-band score from the `agentic_task` dimension, one of
    /// `{0, 0.2, 0.6, 1.0}`, consumed by the orchestrator to choose between
    /// the default and agentic tier-to-model tables.
    pub agentic_score: f64,
}

struct HistoryEntry {
    tier: Tier,
    last_score: f64,
    last_seen: Instant,
}

/// The 15-dimension rule classifier.
///
/// Holds no per-request state beyond the bounded `score_history` map used
/// for hysteresis; safe to share behind an `Arc` across threads.
pub struct RuleClassifier {
    config: ScoringConfig,
    score_history: RwLock<HashMap<String, HistoryEntry>>,
    call_count: AtomicU64,
}

impl RuleClassifier {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            score_history: RwLock::new(HashMap::new()),
            call_count: AtomicU64::new(0),
        }
    }

    /// Current configuration, e.g. for the adaptive weight manager to read
    /// back the baseline before adjusting.
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Replace the active configuration (used by the adaptive weight
    /// manager after recomputing weights).
    pub fn set_config(&mut self, config: ScoringConfig) {
        self.config = config;
    }

    /// Classify a prompt, given its precomputed fingerprint and
    /// `estimatedTokens`, using the classifier's own configured weights.
    pub fn classify(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        estimated_tokens: u32,
        fingerprint: &Fingerprint,
    ) -> ScoringResult {
        self.classify_with(prompt, system_prompt, estimated_tokens, fingerprint, &|name| {
            self.config.weight_of(name)
        })
    }

    /// Classify a prompt using `weight_of` in place of the configured
    /// weights for each dimension -- how the adaptive weight manager's
    /// retuned weights get applied without mutating shared config.
    ///
    /// `prompt` is the user turn only; most dimensions scan `system_prompt +
    /// " " + prompt` (the "full" text); `reasoning_markers` and
    /// `question_complexity` scan the user `prompt` only, so a system
    /// prompt instructing "think step by step" cannot by itself force
    /// `REASONING` on a trivial user question.
    pub fn classify_with(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        estimated_tokens: u32,
        fingerprint: &Fingerprint,
        weight_of: &dyn Fn(&str) -> f64,
    ) -> ScoringResult {
        let full = match system_prompt {
            Some(sys) if !sys.is_empty() => format!("{sys} {prompt}"),
            _ => prompt.to_string(),
        };
        let reasoning_hits = count_hits(prompt, &self.config.keyword_lists.reasoning_markers);
        if reasoning_hits >= self.config.reasoning_override_count as usize {
            let confidence = 0.85_f64.max(sigmoid_confidence(
                self.config.confidence_steepness,
                1.0,
            ));
            self.record_tier(&fingerprint.digest, Tier::Reasoning, 1.0);
            return ScoringResult {
                weighted_score: 1.0,
                dimension_scores: vec![DimensionScore {
                    name: "reasoning_markers",
                    raw: 1.0,
                    weight: weight_of("reasoning_markers"),
                }],
                tier: Tier::Reasoning,
                confidence,
                is_ambiguous: false,
                reasoning_override: true,
                agentic_score: 0.0,
            };
        }

        let dimension_scores = self.score_dimensions(prompt, &full, estimated_tokens, weight_of);
        let weighted_score = aggregate(&dimension_scores);
        let agentic_score = dimension_scores
            .iter()
            .find(|d| d.name == "agentic_task")
            .map(|d| d.raw.max(0.0))
            .unwrap_or(0.0);

        let boundaries = self.config.tier_boundaries;
        let natural_tier = tier_for_score(weighted_score, boundaries);
        let mut distance = distance_to_nearest_boundary(weighted_score, boundaries);

        let prior = self.prior_entry(&fingerprint.digest);
        let tier = match prior.map(|p| p.0) {
            Some(last) if last != natural_tier => {
                if distance < FUZZY_BAND {
                    distance = FUZZY_BAND;
                    last
                } else if transition_allowed(last, natural_tier, weighted_score, boundaries, FUZZY_BAND) {
                    natural_tier
                } else {
                    last
                }
            }
            Some(last) => last,
            None => natural_tier,
        };
        self.record_tier(&fingerprint.digest, tier, weighted_score);

        let confidence = sigmoid_confidence(self.config.confidence_steepness, distance);
        let is_ambiguous = confidence < self.config.confidence_threshold;

        ScoringResult {
            weighted_score,
            dimension_scores,
            tier,
            confidence,
            is_ambiguous,
            reasoning_override: false,
            agentic_score,
        }
    }

    fn prior_entry(&self, digest: &str) -> Option<(Tier, f64)> {
        let history = self.score_history.read().unwrap();
        history.get(digest).map(|e| (e.tier, e.last_score))
    }

    fn record_tier(&self, digest: &str, tier: Tier, score: f64) {
        {
            let mut history = self.score_history.write().unwrap();
            history.insert(
                digest.to_string(),
                HistoryEntry { tier, last_score: score, last_seen: Instant::now() },
            );
        }
        let n = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 100 == 0 {
            self.cleanup_history();
        }
    }

    fn cleanup_history(&self) {
        let mut history = self.score_history.write().unwrap();
        if history.len() <= HISTORY_SOFT_CAP {
            history.retain(|_, e| e.last_seen.elapsed() < HISTORY_TTL);
            return;
        }
        let now = Instant::now();
        history.retain(|_, e| now.duration_since(e.last_seen) < HISTORY_TTL);
        if history.len() > HISTORY_SOFT_CAP {
            let mut by_age: Vec<(String, Instant)> =
                history.iter().map(|(k, v)| (k.clone(), v.last_seen)).collect();
            by_age.sort_by_key(|(_, seen)| *seen);
            let evict = history.len() - HISTORY_SOFT_CAP;
            for (key, _) in by_age.into_iter().take(evict) {
                history.remove(&key);
            }
        }
    }

    /// `prompt` is the user turn only; `full` is `system_prompt + " " +
    /// prompt` (or just `prompt` when there is no system prompt). Dimensions
    /// operate on `full` except `reasoning_markers` and
    /// `question_complexity`, which are scored against `prompt` alone (see
    /// `classify_with`).
    fn score_dimensions(
        &self,
        prompt: &str,
        full: &str,
        estimated_tokens: u32,
        weight_of: &dyn Fn(&str) -> f64,
    ) -> Vec<DimensionScore> {
        let kw = &self.config.keyword_lists;

        let mut scores = Vec::with_capacity(15);
        let mut push = |name: &'static str, raw: f64| {
            scores.push(DimensionScore { name, raw, weight: weight_of(name) });
        };

        push(
            "token_count",
            token_count_score(estimated_tokens, self.config.token_count_thresholds),
        );
        push("code_presence", tiered(count_hits(full, &kw.code_markers), &[(2, 1.0), (1, 0.5)]));
        push(
            "reasoning_markers",
            tiered(count_hits(prompt, &kw.reasoning_markers), &[(2, 1.0), (1, 0.7)]),
        );
        push("technical_terms", tiered(count_hits(full, &kw.technical_terms), &[(4, 1.0), (2, 0.5)]));
        push("creative_markers", tiered(count_hits(full, &kw.creative_markers), &[(2, 0.7), (1, 0.5)]));
        push("simple_indicators", if count_hits(full, &kw.simple_indicators) > 0 { -1.0 } else { 0.0 });
        push(
            "multi_step_patterns",
            if crate::fingerprint::matches_multi_step(full) { 0.5 } else { 0.0 },
        );
        push("question_complexity", question_complexity_score(prompt));
        push("imperative_verbs", tiered(count_hits(full, &kw.imperative_verbs), &[(2, 0.5), (1, 0.3)]));
        push("constraint_count", tiered(count_hits(full, &kw.constraint_phrases), &[(3, 0.7), (1, 0.3)]));
        push("output_format", tiered(count_hits(full, &kw.output_format_markers), &[(2, 0.7), (1, 0.4)]));
        push("reference_complexity", tiered(count_hits(full, &kw.reference_markers), &[(2, 0.5), (1, 0.3)]));
        push("negation_complexity", tiered(count_hits(full, &kw.negation_markers), &[(3, 0.5), (2, 0.3)]));
        push("domain_specificity", tiered(count_hits(full, &kw.domain_terms), &[(2, 0.8), (1, 0.5)]));
        push("agentic_task", tiered(count_hits(full, &kw.agentic_verbs), &[(4, 1.0), (3, 0.6), (1, 0.2)]));

        scores
    }
}

/// `< simple → −1`, `> complex → +1`, else `0`.
fn token_count_score(estimated_tokens: u32, thresholds: (u32, u32)) -> f64 {
    let (simple, complex) = thresholds;
    if estimated_tokens < simple {
        -1.0
    } else if estimated_tokens > complex {
        1.0
    } else {
        0.0
    }
}

/// First `(min_hits, value)` step (in order, highest threshold first) that
/// `hits` clears, else `0.0`.
fn tiered(hits: usize, steps: &[(usize, f64)]) -> f64 {
    for &(min_hits, value) in steps {
        if hits >= min_hits {
            return value;
        }
    }
    0.0
}

fn count_hits(text: &str, keywords: &[String]) -> usize {
    let lower = text.to_lowercase();
    keywords.iter().filter(|k| lower.contains(k.as_str())).count()
}

/// `(halfwidth? + fullwidth？) > 3 → 0.5`; else if there are zero question
/// marks and at least two occurrences of a CJK "how" word (`怎么/如何/怎样`)
/// → `0.5`; else `0`.
fn question_complexity_score(prompt: &str) -> f64 {
    let marks = prompt.chars().filter(|&c| c == '?' || c == '\u{FF1F}').count();
    if marks > 3 {
        return 0.5;
    }
    if marks == 0 {
        let cjk_how = ["怎么", "如何", "怎样"].iter().filter(|w| prompt.contains(*w)).count();
        if cjk_how >= 2 {
            return 0.5;
        }
    }
    0.0
}

/// `weightedScore = Σ_d score(d) · weight(d.name)` -- a plain sum, not
/// normalized by total weight. Each dimension's sign already encodes
/// whether it pushes difficulty up or down (`simple_indicators` and
/// `token_count` can both contribute negatively).
fn aggregate(scores: &[DimensionScore]) -> f64 {
    scores.iter().map(|s| s.raw * s.weight).sum()
}

fn tier_for_score(score: f64, boundaries: (f64, f64, f64)) -> Tier {
    let (b1, b2, b3) = boundaries;
    if score < b1 {
        Tier::Simple
    } else if score < b2 {
        Tier::Medium
    } else if score < b3 {
        Tier::Complex
    } else {
        Tier::Reasoning
    }
}

fn distance_to_nearest_boundary(score: f64, boundaries: (f64, f64, f64)) -> f64 {
    let (b1, b2, b3) = boundaries;
    [b1, b2, b3]
        .iter()
        .map(|b| (score - *b).abs())
        .fold(f64::MAX, f64::min)
}

/// Schmitt-trigger check: outside the fuzzy band, a transition away from
/// `last` is only honored if `score` clears the boundary adjacent to `last`
/// (in the direction of motion) by at least `fuzzy`. Makes the up-transition
/// and down-transition thresholds asymmetric so a fingerprint sitting right
/// next to a boundary doesn't flap between two tiers on score noise alone.
fn transition_allowed(
    last: Tier,
    natural: Tier,
    score: f64,
    boundaries: (f64, f64, f64),
    fuzzy: f64,
) -> bool {
    let b = [boundaries.0, boundaries.1, boundaries.2];
    if natural.rank() > last.rank() {
        score >= b[last.rank() as usize] + fuzzy
    } else if natural.rank() < last.rank() {
        score <= b[(last.rank() - 1) as usize] - fuzzy
    } else {
        true
    }
}

fn sigmoid_confidence(steepness: f64, distance: f64) -> f64 {
    1.0 / (1.0 + (-steepness * distance).exp())
}

/// `ceil((len(system_prompt) + 1 + len(prompt)) / 4)` -- a cheap
/// characters-per-token-of-4 estimate used wherever an actual tokenizer
/// isn't worth the dependency. Shared by the orchestrator so the classifier
/// and the large-context override agree on the same number.
pub fn estimated_tokens(prompt: &str, system_prompt: Option<&str>) -> u32 {
    let system_len = system_prompt.map(|s| s.chars().count()).unwrap_or(0);
    let separator = if system_prompt.is_some() { 1 } else { 0 };
    let total = system_len + separator + prompt.chars().count();
    ((total as f64) / 4.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint;

    fn classifier() -> RuleClassifier {
        RuleClassifier::new(ScoringConfig::default())
    }

    fn classify(c: &RuleClassifier, prompt: &str, system: Option<&str>) -> ScoringResult {
        let fp = fingerprint::compute(prompt, system);
        let tokens = estimated_tokens(prompt, system);
        c.classify(prompt, system, tokens, &fp)
    }

    #[test]
    fn simple_question_classifies_low_tier() {
        let c = classifier();
        let result = classify(&c, "What is the capital of France?", None);
        assert_eq!(result.tier, Tier::Simple);
    }

    #[test]
    fn reasoning_keywords_force_reasoning_tier_p1() {
        let c = classifier();
        let result = classify(&c, "Analyze and prove why this sorting algorithm is correct.", None);
        assert_eq!(result.tier, Tier::Reasoning);
        assert!(result.reasoning_override);
        assert!(result.confidence >= 0.85);
    }

    #[test]
    fn code_heavy_prompt_raises_tier() {
        let c = classifier();
        let result = classify(
            &c,
            "Refactor this function and optimize the algorithm's concurrency model with a mutex, then compile it.",
            None,
        );
        assert!(result.tier >= Tier::Medium);
    }

    #[test]
    fn hysteresis_keeps_prior_tier_inside_fuzzy_band() {
        let c = classifier();
        let prompt = "implement a small function";

        let first = classify(&c, prompt, None);
        let second = classify(&c, prompt, None);
        // Same fingerprint, same input -- hysteresis is a no-op here, but
        // this exercises that repeated calls don't panic and stay stable.
        assert_eq!(first.tier, second.tier);
    }

    #[test]
    fn hysteresis_resists_a_step_that_does_not_clear_the_fuzzy_width() {
        let c = classifier();
        let fp = fingerprint::compute("rebalance the shards", None);

        {
            let mut history = c.score_history.write().unwrap();
            history.insert(
                fp.digest.clone(),
                HistoryEntry { tier: Tier::Medium, last_score: 0.17, last_seen: Instant::now() },
            );
        }
        let boundaries = c.config().tier_boundaries;
        let just_past = boundaries.1 + FUZZY_BAND * 0.5;
        assert_eq!(tier_for_score(just_past, boundaries), Tier::Complex);
        assert!(!transition_allowed(Tier::Medium, Tier::Complex, just_past, boundaries, FUZZY_BAND));

        let well_past = boundaries.1 + FUZZY_BAND * 2.0;
        assert!(transition_allowed(Tier::Medium, Tier::Complex, well_past, boundaries, FUZZY_BAND));
    }

    #[test]
    fn ambiguous_low_confidence_is_flagged() {
        let mut config = ScoringConfig::default();
        config.confidence_threshold = 0.999;
        let c = RuleClassifier::new(config);
        let result = classify(&c, "write a short note", None);
        assert!(result.is_ambiguous);
    }

    #[test]
    fn system_prompt_contributes_to_full_text_dimensions() {
        let c = classifier();
        let prompt = "help me with this";
        let system = "You are an expert in kubernetes and distributed systems.";
        let result = classify(&c, prompt, Some(system));
        let domain_raw = result
            .dimension_scores
            .iter()
            .find(|d| d.name == "domain_specificity")
            .unwrap()
            .raw;
        assert!(domain_raw > 0.0);
    }

    #[test]
    fn system_prompt_reasoning_markers_do_not_force_override() {
        let c = classifier();
        let prompt = "what's 2 + 2?";
        let system = "Always analyze and prove your reasoning step by step.";
        let result = classify(&c, prompt, Some(system));
        assert!(!result.reasoning_override);
        assert_ne!(result.tier, Tier::Reasoning);
    }

    #[test]
    fn simple_indicators_pull_score_down() {
        let c = classifier();
        let result = classify(&c, "What is 2 plus 2?", None);
        assert_eq!(result.tier, Tier::Simple);
    }

    #[test]
    fn question_complexity_handles_cjk_how_words() {
        let score = question_complexity_score("这个怎么做，那个如何优化");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn question_complexity_ignores_single_cjk_how_word() {
        assert_eq!(question_complexity_score("如何优化这个系统"), 0.0);
    }

    #[test]
    fn question_complexity_scores_many_question_marks() {
        assert_eq!(question_complexity_score("really? are you sure? why? how? ok?"), 0.5);
    }

    #[test]
    fn token_count_score_discrete_steps() {
        let thresholds = (50, 500);
        assert_eq!(token_count_score(10, thresholds), -1.0);
        assert_eq!(token_count_score(200, thresholds), 0.0);
        assert_eq!(token_count_score(700, thresholds), 1.0);
    }

    #[test]
    fn agentic_task_dimension_feeds_agentic_score() {
        let c = classifier();
        let prompt = "call the tool to search the web, then use the function and run the command, execute it, invoke it again";
        let result = classify(&c, prompt, None);
        assert!(result.agentic_score >= 0.6);
    }

    #[test]
    fn estimated_tokens_counts_system_and_prompt() {
        let tokens = estimated_tokens("abcd", Some("wxyz"));
        assert_eq!(tokens, 3); // (4 + 1 + 4) / 4 = 2.25 -> ceil 3
        let tokens_no_system = estimated_tokens("abcd", None);
        assert_eq!(tokens_no_system, 1);
    }
}
