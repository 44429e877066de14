//! Adaptive weight manager -- nudges the classifier's dimension weights
//! based on how requests attributed to each dimension actually turned out,
//! and tracks the same performance breakdown per tier for reporting.
//!
//! Feedback is accumulated continuously but only converted into new
//! weights every [`ADJUSTMENT_INTERVAL`] calls, smoothed so a single bad
//! batch cannot swing a weight from one extreme to the other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use routecraft_types::{ErrorKind, ObservedOutcome, ScoringConfig, Tier};

use crate::classifier::DimensionScore;

/// How often (in calls to [`AdaptiveWeights::record_feedback`]) the
/// accumulated performance stats are folded into new weight adjustment
/// factors.
const ADJUSTMENT_INTERVAL: u64 = 10;

/// A dimension's raw score is considered "engaged" for this request -- and
/// therefore gets credited or blamed for the outcome -- once it crosses
/// this threshold.
const ENGAGEMENT_THRESHOLD: f64 = 0.5;

const MIN_FACTOR: f64 = 0.8;
const MAX_FACTOR: f64 = 1.2;

/// Latency, in milliseconds, above which the latency performance term
/// bottoms out at zero.
const LATENCY_CAP_MS: f64 = 8000.0;
/// Cost above which the cost performance term bottoms out at zero.
const COST_CAP: f64 = 0.50;

#[derive(Debug, Clone, Default)]
struct PerformanceAccumulator {
    samples: u64,
    successes: u64,
    total_latency_ms: u64,
    latency_samples: u64,
    total_cost: f64,
    cost_samples: u64,
}

impl PerformanceAccumulator {
    fn record(&mut self, outcome: &ObservedOutcome) {
        self.samples += 1;
        if outcome.success {
            self.successes += 1;
        }
        if let Some(latency) = outcome.latency_ms {
            self.total_latency_ms += latency;
            self.latency_samples += 1;
        }
        if let Some(cost) = outcome.cost {
            self.total_cost += cost;
            self.cost_samples += 1;
        }
    }

    /// Weighted performance score `p = 0.3*L + 0.3*C + 0.4*S`, all terms
    /// normalized to `[0, 1]` with higher meaning better.
    fn performance_score(&self) -> f64 {
        if self.samples == 0 {
            return 0.5;
        }
        let success_rate = self.successes as f64 / self.samples as f64;
        let latency_score = if self.latency_samples == 0 {
            0.5
        } else {
            let avg = self.total_latency_ms as f64 / self.latency_samples as f64;
            1.0 - (avg / LATENCY_CAP_MS).min(1.0)
        };
        let cost_score = if self.cost_samples == 0 {
            0.5
        } else {
            let avg = self.total_cost / self.cost_samples as f64;
            1.0 - (avg / COST_CAP).min(1.0)
        };
        0.3 * latency_score + 0.3 * cost_score + 0.4 * success_rate
    }
}

/// Public snapshot of a dimension's accumulated performance, for
/// `getRouterStats`-style reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DimensionPerformance {
    pub samples: u64,
    pub success_rate: f64,
    pub current_weight: f64,
    pub adjustment_factor: f64,
}

/// Public snapshot of a tier's accumulated performance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TierPerformance {
    pub samples: u64,
    pub success_rate: f64,
    pub error_counts: HashMap<String, u64>,
}

struct DimensionState {
    base_weight: f64,
    adjustment_factor: f64,
    accumulator: PerformanceAccumulator,
}

struct TierState {
    accumulator: PerformanceAccumulator,
    error_counts: HashMap<String, u64>,
}

/// Tracks per-dimension and per-tier performance and periodically retunes
/// the classifier's dimension weights.
pub struct AdaptiveWeights {
    dimensions: RwLock<HashMap<String, DimensionState>>,
    tiers: RwLock<HashMap<Tier, TierState>>,
    call_count: AtomicU64,
}

impl AdaptiveWeights {
    pub fn new(base_config: &ScoringConfig) -> Self {
        let mut dimensions = HashMap::new();
        for (name, weight) in &base_config.dimension_weights {
            dimensions.insert(
                name.clone(),
                DimensionState {
                    base_weight: *weight,
                    adjustment_factor: 1.0,
                    accumulator: PerformanceAccumulator::default(),
                },
            );
        }
        Self {
            dimensions: RwLock::new(dimensions),
            tiers: RwLock::new(HashMap::new()),
            call_count: AtomicU64::new(0),
        }
    }

    /// Record feedback for every dimension that was engaged in producing a
    /// classification, plus the tier itself.
    pub fn record_feedback(
        &self,
        dimension_scores: &[DimensionScore],
        tier: Tier,
        outcome: &ObservedOutcome,
    ) {
        for dim in dimension_scores {
            if dim.raw >= ENGAGEMENT_THRESHOLD {
                self.apply_signal(&format!("dimension:{}", dim.name), outcome);
            }
        }
        self.apply_signal(&format!("tier:{tier}"), outcome);

        let n = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        if n % ADJUSTMENT_INTERVAL == 0 {
            self.retune();
        }
    }

    /// Apply one feedback signal, resolving it by its `dimension:` or
    /// `tier:` prefix to the bucket it updates.
    fn apply_signal(&self, signal: &str, outcome: &ObservedOutcome) {
        if let Some(name) = signal.strip_prefix("dimension:") {
            let mut dims = self.dimensions.write().unwrap();
            if let Some(state) = dims.get_mut(name) {
                state.accumulator.record(outcome);
            }
        } else if let Some(tier_name) = signal.strip_prefix("tier:") {
            if let Some(tier) = parse_tier(tier_name) {
                let mut tiers = self.tiers.write().unwrap();
                let state = tiers.entry(tier).or_insert_with(|| TierState {
                    accumulator: PerformanceAccumulator::default(),
                    error_counts: HashMap::new(),
                });
                state.accumulator.record(outcome);
                if let Some(kind) = outcome.error_kind {
                    *state.error_counts.entry(error_kind_label(kind).to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    fn retune(&self) {
        let mut dims = self.dimensions.write().unwrap();
        for (name, state) in dims.iter_mut() {
            let p = state.accumulator.performance_score();
            let target = MIN_FACTOR + p * (MAX_FACTOR - MIN_FACTOR);
            let smoothed = 0.7 * state.adjustment_factor + 0.3 * target;
            state.adjustment_factor = smoothed.clamp(MIN_FACTOR, MAX_FACTOR);
            tracing::debug!(
                dimension = name.as_str(),
                factor = state.adjustment_factor,
                "adaptive weight retuned"
            );
        }
    }

    /// Current effective weight for a dimension (`base * adjustment_factor`).
    pub fn weight_of(&self, dimension: &str) -> Option<f64> {
        let dims = self.dimensions.read().unwrap();
        dims.get(dimension).map(|s| s.base_weight * s.adjustment_factor)
    }

    /// All current effective weights, suitable for rebuilding a
    /// [`ScoringConfig`].
    pub fn all_weights(&self) -> HashMap<String, f64> {
        let dims = self.dimensions.read().unwrap();
        dims.iter()
            .map(|(name, s)| (name.clone(), s.base_weight * s.adjustment_factor))
            .collect()
    }

    pub fn dimension_performance(&self, dimension: &str) -> Option<DimensionPerformance> {
        let dims = self.dimensions.read().unwrap();
        dims.get(dimension).map(|s| DimensionPerformance {
            samples: s.accumulator.samples,
            success_rate: if s.accumulator.samples == 0 {
                0.0
            } else {
                s.accumulator.successes as f64 / s.accumulator.samples as f64
            },
            current_weight: s.base_weight * s.adjustment_factor,
            adjustment_factor: s.adjustment_factor,
        })
    }

    pub fn tier_performance(&self, tier: Tier) -> Option<TierPerformance> {
        let tiers = self.tiers.read().unwrap();
        tiers.get(&tier).map(|s| TierPerformance {
            samples: s.accumulator.samples,
            success_rate: if s.accumulator.samples == 0 {
                0.0
            } else {
                s.accumulator.successes as f64 / s.accumulator.samples as f64
            },
            error_counts: s.error_counts.clone(),
        })
    }
}

fn parse_tier(name: &str) -> Option<Tier> {
    match name {
        "SIMPLE" => Some(Tier::Simple),
        "MEDIUM" => Some(Tier::Medium),
        "COMPLEX" => Some(Tier::Complex),
        "REASONING" => Some(Tier::Reasoning),
        _ => None,
    }
}

fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout => "timeout",
        ErrorKind::RateLimit => "rate_limit",
        ErrorKind::Server5xx => "server5xx",
        ErrorKind::Auth => "auth",
        ErrorKind::PaymentRequired => "payment_required",
        ErrorKind::Canceled => "canceled",
        ErrorKind::Other => "other",
    }
}
