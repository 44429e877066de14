//! Model health tracker -- a global, model-keyed status machine fed by
//! post-hoc outcome signals, independent of which tier or session a call
//! came through.
//!
//! Each model accumulates an EMA of latency, a bounded window of recent
//! latencies for a p95 estimate, and a consecutive-error counter that
//! drives a cooldown/degraded/unhealthy status ladder. `get_best_model`
//! is how the orchestrator turns "the tier's candidate list" into "the one
//! candidate to actually call."

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use routecraft_types::ObservedOutcome;

/// Consecutive failures after which a model is marked unhealthy and
/// placed in cooldown.
const UNHEALTHY_THRESHOLD: u32 = 3;
/// Consecutive failures after which a model is marked degraded (but still
/// callable).
const DEGRADED_THRESHOLD: u32 = 2;
/// Success rate (over the trailing latency window) below which a model is
/// considered degraded even without consecutive failures.
const DEGRADED_SUCCESS_RATE: f64 = 0.85;
/// p95 latency above which a model is considered degraded.
const DEGRADED_LATENCY_MS: f64 = 30000.0;
/// How long a model stays in cooldown before getting a trial request.
const COOLDOWN_DURATION: Duration = Duration::from_secs(5 * 60);
/// EMA smoothing factor for latency.
const LATENCY_ALPHA: f64 = 0.3;
/// Number of recent latency samples kept for the p95 estimate.
const LATENCY_WINDOW: usize = 100;
/// Two models within this success-rate band are treated as tied and
/// broken on latency instead.
const SUCCESS_RATE_TIE_BAND: f64 = 0.05;

/// A model's health status, in descending priority for model selection --
/// `Healthy` is always preferred over `Degraded`, which is preferred over
/// the two non-callable statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Cooldown,
}

impl HealthStatus {
    fn priority(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Cooldown => 3,
        }
    }
}

struct ModelHealthRecord {
    avg_latency_ms: f64,
    recent_latencies_ms: Vec<f64>,
    consecutive_errors: u32,
    total_calls: u64,
    total_successes: u64,
    cooldown_until: Option<Instant>,
    /// Set when a cooldown expires on its own (no success observed yet).
    /// The next successful outcome is still reported as `Degraded` rather
    /// than jumping straight back to `Healthy` -- a model that was just in
    /// cooldown earns its "healthy" status back, it doesn't start with it.
    recovering: bool,
}

impl Default for ModelHealthRecord {
    fn default() -> Self {
        Self {
            avg_latency_ms: 0.0,
            recent_latencies_ms: Vec::with_capacity(LATENCY_WINDOW),
            consecutive_errors: 0,
            total_calls: 0,
            total_successes: 0,
            cooldown_until: None,
            recovering: false,
        }
    }
}

impl ModelHealthRecord {
    /// Clear an expired cooldown, downgrading to the recovering state
    /// rather than letting the stale `consecutive_errors` count fall
    /// through to `Unhealthy` on the next status read.
    fn resolve_expired_cooldown(&mut self) {
        if let Some(until) = self.cooldown_until {
            if Instant::now() >= until {
                self.cooldown_until = None;
                self.recovering = true;
                self.consecutive_errors = self.consecutive_errors.min(DEGRADED_THRESHOLD);
            }
        }
    }

    fn record(&mut self, outcome: &ObservedOutcome) {
        self.resolve_expired_cooldown();
        self.total_calls += 1;
        if outcome.success {
            self.total_successes += 1;
            if self.recovering {
                // First success after cooldown: stay degraded this round.
                self.consecutive_errors = DEGRADED_THRESHOLD;
                self.recovering = false;
            } else {
                self.consecutive_errors = 0;
            }
        } else {
            self.recovering = false;
            self.consecutive_errors += 1;
            if self.consecutive_errors >= UNHEALTHY_THRESHOLD {
                self.cooldown_until = Some(Instant::now() + COOLDOWN_DURATION);
            }
        }
        if let Some(latency) = outcome.latency_ms {
            let latency = latency as f64;
            self.avg_latency_ms = if self.total_calls == 1 {
                latency
            } else {
                LATENCY_ALPHA * latency + (1.0 - LATENCY_ALPHA) * self.avg_latency_ms
            };
            self.recent_latencies_ms.push(latency);
            if self.recent_latencies_ms.len() > LATENCY_WINDOW {
                self.recent_latencies_ms.remove(0);
            }
        }
    }

    fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_calls as f64
        }
    }

    fn p95_latency_ms(&self) -> f64 {
        if self.recent_latencies_ms.is_empty() {
            return 0.0;
        }
        let mut sorted = self.recent_latencies_ms.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }

    fn status(&mut self) -> HealthStatus {
        self.resolve_expired_cooldown();
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return HealthStatus::Cooldown;
            }
        }
        if self.consecutive_errors >= UNHEALTHY_THRESHOLD {
            return HealthStatus::Unhealthy;
        }
        if self.consecutive_errors >= DEGRADED_THRESHOLD
            || self.success_rate() < DEGRADED_SUCCESS_RATE
            || self.p95_latency_ms() > DEGRADED_LATENCY_MS
        {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }

    fn is_available(&mut self) -> bool {
        !matches!(self.status(), HealthStatus::Cooldown | HealthStatus::Unhealthy)
    }
}

/// Public, read-only view of a model's health, for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelHealthSnapshot {
    pub status: HealthStatusLabel,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub success_rate: f64,
    pub consecutive_errors: u32,
}

/// String-friendly mirror of [`HealthStatus`] for serialization in stats
/// snapshots without requiring the internal struct to derive `Serialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatusLabel {
    Healthy,
    Degraded,
    Unhealthy,
    Cooldown,
}

impl From<HealthStatus> for HealthStatusLabel {
    fn from(s: HealthStatus) -> Self {
        match s {
            HealthStatus::Healthy => HealthStatusLabel::Healthy,
            HealthStatus::Degraded => HealthStatusLabel::Degraded,
            HealthStatus::Unhealthy => HealthStatusLabel::Unhealthy,
            HealthStatus::Cooldown => HealthStatusLabel::Cooldown,
        }
    }
}

/// Global, model-keyed health tracker.
pub struct HealthTracker {
    records: RwLock<HashMap<String, ModelHealthRecord>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    /// Record an outcome for a model, creating its record on first use.
    pub fn record_outcome(&self, model: &str, outcome: &ObservedOutcome) {
        let mut records = self.records.write().unwrap();
        let record = records.entry(model.to_string()).or_default();
        record.record(outcome);
        let status = record.status();
        if matches!(status, HealthStatus::Unhealthy | HealthStatus::Cooldown) {
            let label = HealthStatusLabel::from(status);
            tracing::warn!(model, status = ?label, "model health degraded");
        }
    }

    pub fn is_available(&self, model: &str) -> bool {
        let mut records = self.records.write().unwrap();
        records.get_mut(model).map(|r| r.is_available()).unwrap_or(true)
    }

    pub fn snapshot(&self, model: &str) -> Option<ModelHealthSnapshot> {
        let mut records = self.records.write().unwrap();
        records.get_mut(model).map(|r| ModelHealthSnapshot {
            status: r.status().into(),
            avg_latency_ms: r.avg_latency_ms,
            p95_latency_ms: r.p95_latency_ms(),
            success_rate: r.success_rate(),
            consecutive_errors: r.consecutive_errors,
        })
    }

    /// Pick the best candidate model from `candidates` (preference order:
    /// healthy over degraded over unavailable; within a tier, success
    /// rate within [`SUCCESS_RATE_TIE_BAND`] is treated as equal and
    /// broken on average latency). Falls back to the first candidate if
    /// every candidate is unavailable, since refusing to route is worse
    /// than trying the primary anyway.
    pub fn get_best_model<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        if candidates.is_empty() {
            return None;
        }
        let mut records = self.records.write().unwrap();

        let mut scored: Vec<(&'a str, HealthStatus, f64, f64)> = candidates
            .iter()
            .map(|&name| match records.get_mut(name) {
                Some(r) => (name, r.status(), r.success_rate(), r.avg_latency_ms),
                None => (name, HealthStatus::Healthy, 1.0, 0.0),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.priority()
                .cmp(&b.1.priority())
                .then_with(|| {
                    if (a.2 - b.2).abs() <= SUCCESS_RATE_TIE_BAND {
                        std::cmp::Ordering::Equal
                    } else {
                        b.2.partial_cmp(&a.2).unwrap()
                    }
                })
                .then_with(|| a.3.partial_cmp(&b.3).unwrap())
        });

        let available: Vec<_> = scored.iter().filter(|(_, s, _, _)| {
            !matches!(s, HealthStatus::Unhealthy | HealthStatus::Cooldown)
        }).collect();

        if let Some((name, ..)) = available.first() {
            Some(name)
        } else {
            Some(scored[0].0)
        }
    }

    pub fn reset(&self) {
        self.records.write().unwrap().clear();
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
