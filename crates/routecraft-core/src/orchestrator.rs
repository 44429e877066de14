//! Route orchestrator -- composes the fingerprinter, classifier, score
//! cache, adaptive weight manager, health tracker, and session store into
//! the single `route` / `record_feedback` / `stats` surface a front-end
//! actually calls.

use std::collections::HashMap;
use std::sync::Arc;

use routecraft_types::{
    ObservedOutcome, Overrides, Result as TypesResult, RouteRequest, RoutingDecision,
    ScoringConfig, Tier, TierTable,
};

use crate::adaptive::{AdaptiveWeights, DimensionPerformance, TierPerformance};
use crate::cache::ScoreCache;
use crate::classifier::{self, RuleClassifier};
use crate::fingerprint;
use crate::health::HealthTracker;
use crate::session::SessionStore;

/// Aggregate, serializable rollup of the orchestrator's internal stores,
/// for `getRouterStats()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouterStats {
    pub cache_entries: usize,
    pub active_sessions: usize,
    pub dimension_weights: HashMap<String, f64>,
    pub dimension_performance: HashMap<String, DimensionPerformance>,
    pub tier_performance: HashMap<Tier, TierPerformance>,
}

/// Composes the five subsystems into one request-routing entry point.
pub struct RouteOrchestrator {
    config: ScoringConfig,
    overrides: Overrides,
    tier_table: TierTable,
    agentic_tier_table: Option<TierTable>,
    classifier: RuleClassifier,
    cache: Arc<ScoreCache>,
    adaptive: Arc<AdaptiveWeights>,
    health: Arc<HealthTracker>,
    sessions: Arc<SessionStore>,
}

impl RouteOrchestrator {
    /// Construct a new orchestrator, validating the scoring config before
    /// committing to it. `agentic_tier_table` is a parallel tier-to-model
    /// table selected in place of `tier_table` when agentic mode applies
    /// (see [`Self::select_tier_table`]); pass `None` to always use
    /// `tier_table`.
    pub fn new(
        config: ScoringConfig,
        overrides: Overrides,
        tier_table: TierTable,
        agentic_tier_table: Option<TierTable>,
    ) -> TypesResult<Self> {
        config.validate()?;
        let adaptive = Arc::new(AdaptiveWeights::new(&config));
        let classifier = RuleClassifier::new(config.clone());
        Ok(Self {
            config,
            overrides,
            tier_table,
            agentic_tier_table,
            classifier,
            cache: Arc::new(ScoreCache::new()),
            adaptive,
            health: Arc::new(HealthTracker::new()),
            sessions: Arc::new(SessionStore::new()),
        })
    }

    /// Classify a request and select a model for it.
    pub fn route(&self, request: &RouteRequest) -> RoutingDecision {
        let mut degraded_pin = false;
        if !request.options.disable_cache {
            if let Some(session_id) = &request.session_id {
                if let Some(view) = self.sessions.get_session(session_id) {
                    if !view.is_degraded {
                        return self.decision_from_pin(session_id, &view);
                    }
                    degraded_pin = true;
                }
            }
        }

        let fp = fingerprint::compute(&request.prompt, request.system_prompt.as_deref());
        let estimated_tokens =
            classifier::estimated_tokens(&request.prompt, request.system_prompt.as_deref());

        let prior_cached = if request.options.disable_cache { None } else { self.cache.get(&fp.digest) };

        let (mut tier, mut confidence, weighted_score, agentic_score, engaged_dimensions, mut method) =
            self.classify(request, &fp, estimated_tokens);

        if !request.options.disable_cache {
            let boundaries = self.config.tier_boundaries;
            self.cache.set(&fp.digest, tier, confidence, weighted_score, boundaries);
        }

        if let Some(cached) = &prior_cached {
            if ScoreCache::should_use_cached_tier(cached, weighted_score, tier) {
                tier = cached.tier;
                confidence = confidence.max(cached.confidence).max(0.7);
                method = format!("{method}+fuzzy_boundary_cache");
            }
        }

        let mut reasoning = format!("weighted_score={weighted_score:.3}, method={method}");

        let (selected_table, agentic_selected) = self.select_tier_table(request, agentic_score);
        if agentic_selected {
            reasoning.push_str(", override=agentic_mode");
        }
        if self.apply_max_tokens_override(estimated_tokens, &mut tier) {
            reasoning.push_str(", override=max_tokens");
        }
        if self.apply_structured_output_override(request, &mut tier) {
            reasoning.push_str(", override=structured_output");
            confidence = confidence.max(self.config.confidence_threshold);
        }

        let candidates = selected_table.get(tier).map(|m| m.candidates()).unwrap_or_default();
        let model = if request.options.disable_health_tracking {
            candidates.first().copied().unwrap_or("unknown").to_string()
        } else {
            self.health.get_best_model(&candidates).unwrap_or("unknown").to_string()
        };

        if let Some(session_id) = &request.session_id {
            if degraded_pin {
                self.sessions.reassign_during_degradation(session_id, tier, &model);
            } else {
                self.sessions.set_session(session_id, tier, &model);
            }
        }

        let mut meta = HashMap::new();
        meta.insert("fingerprint".to_string(), fp.digest.clone());
        meta.insert("weighted_score".to_string(), weighted_score.to_string());
        meta.insert("engaged_dimensions".to_string(), engaged_dimensions.join(","));
        if let Some(session_id) = &request.session_id {
            meta.insert("session_id".to_string(), session_id.clone());
        }

        RoutingDecision { tier, model, confidence, method, reasoning, meta }
    }

    fn decision_from_pin(&self, session_id: &str, view: &crate::session::SessionView) -> RoutingDecision {
        let mut meta = HashMap::new();
        meta.insert("session_id".to_string(), session_id.to_string());
        RoutingDecision {
            tier: view.pinned_tier,
            model: view.pinned_model.clone(),
            confidence: 1.0,
            method: "session_pin".to_string(),
            reasoning: "honoring existing session pin".to_string(),
            meta,
        }
    }

    /// Runs the classifier unconditionally (a cache hit never skips
    /// scoring -- the cache only feeds the fuzzy-boundary-honoring step
    /// back in `route`). Returns `(tier, confidence, weighted_score,
    /// agentic_score, engaged_dimension_names, method)`.
    fn classify(
        &self,
        request: &RouteRequest,
        fp: &fingerprint::Fingerprint,
        estimated_tokens: u32,
    ) -> (Tier, f64, f64, f64, Vec<String>, String) {
        let weight_of: Box<dyn Fn(&str) -> f64> = if request.options.disable_adaptive {
            let config = self.config.clone();
            Box::new(move |name: &str| config.weight_of(name))
        } else {
            let adaptive = self.adaptive.clone();
            let config = self.config.clone();
            Box::new(move |name: &str| adaptive.weight_of(name).unwrap_or_else(|| config.weight_of(name)))
        };

        let mut result = self.classifier.classify_with(
            &request.prompt,
            request.system_prompt.as_deref(),
            estimated_tokens,
            fp,
            weight_of.as_ref(),
        );

        if result.is_ambiguous {
            result.tier = self.overrides.ambiguous_default_tier;
        }

        let engaged: Vec<String> = result
            .dimension_scores
            .iter()
            .filter(|d| d.raw >= 0.5)
            .map(|d| d.name.to_string())
            .collect();

        let method = if result.reasoning_override { "reasoning_override".to_string() } else { "classifier".to_string() };

        (result.tier, result.confidence, result.weighted_score, result.agentic_score, engaged, method)
    }

    /// Whether this request should be routed through the agentic
    /// tier-to-model table instead of the default one, and which table to
    /// actually use -- falls back to the default table whenever no agentic
    /// table is configured, even if the agentic condition is met.
    fn select_tier_table(&self, request: &RouteRequest, agentic_score: f64) -> (&TierTable, bool) {
        let agentic_active =
            self.overrides.agentic_mode_enabled && (agentic_score >= 0.75 || request.options.agentic_mode);
        if agentic_active {
            if let Some(table) = &self.agentic_tier_table {
                return (table, true);
            }
        }
        (&self.tier_table, false)
    }

    fn apply_max_tokens_override(&self, estimated_tokens: u32, tier: &mut Tier) -> bool {
        if estimated_tokens > self.overrides.max_tokens_force_complex && *tier < Tier::Complex {
            *tier = Tier::Complex;
            true
        } else {
            false
        }
    }

    fn apply_structured_output_override(&self, request: &RouteRequest, tier: &mut Tier) -> bool {
        let haystack = match &request.system_prompt {
            Some(sys) => format!("{} {}", request.prompt, sys),
            None => request.prompt.clone(),
        };
        let hits = self
            .config
            .keyword_lists
            .output_format_markers
            .iter()
            .filter(|kw| haystack.to_lowercase().contains(kw.as_str()))
            .count();
        if hits > 0 && *tier < self.overrides.structured_output_min_tier {
            *tier = self.overrides.structured_output_min_tier;
            true
        } else {
            false
        }
    }

    /// Feed back the observed outcome of a previously-returned decision
    /// into the health tracker, adaptive weight manager, and (if the
    /// decision carried one) the session store.
    pub fn record_feedback(&self, decision: &RoutingDecision, observed: &ObservedOutcome) {
        self.health.record_outcome(&decision.model, observed);

        let dims: Vec<crate::classifier::DimensionScore> = decision
            .meta
            .get("engaged_dimensions")
            .map(|s| {
                s.split(',')
                    .filter(|n| !n.is_empty())
                    .map(|n| crate::classifier::DimensionScore {
                        name: dimension_name_to_static(n),
                        raw: 1.0,
                        weight: self.config.weight_of(n),
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.adaptive.record_feedback(&dims, decision.tier, observed);

        if let Some(session_id) = decision.meta.get("session_id") {
            let complexity = decision
                .meta
                .get("weighted_score")
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            let health = self.health.clone();
            self.sessions
                .record_result(session_id, observed, None, complexity, |model| health.is_available(model));
        }
    }

    /// Snapshot the orchestrator's internal stores for reporting.
    pub fn stats(&self) -> RouterStats {
        let dimension_weights = self.adaptive.all_weights();
        let dimension_performance = dimension_weights
            .keys()
            .filter_map(|name| {
                self.adaptive
                    .dimension_performance(name)
                    .map(|p| (name.clone(), p))
            })
            .collect();
        let tier_performance = Tier::ALL
            .into_iter()
            .filter_map(|t| self.adaptive.tier_performance(t).map(|p| (t, p)))
            .collect();

        RouterStats {
            cache_entries: self.cache.len(),
            active_sessions: self.sessions.len(),
            dimension_weights,
            dimension_performance,
            tier_performance,
        }
    }
}

/// `DimensionScore::name` is `&'static str` by design (the 15 dimensions
/// are a fixed, compile-time set); this maps a dimension name parsed back
/// out of `RoutingDecision::meta` onto its static constant so feedback
/// replay doesn't need an owned-string variant of `DimensionScore`.
fn dimension_name_to_static(name: &str) -> &'static str {
    for candidate in routecraft_types::DIMENSIONS {
        if candidate == name {
            return candidate;
        }
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecraft_types::{ErrorKind, RouteOptions};

    fn orchestrator() -> RouteOrchestrator {
        RouteOrchestrator::new(ScoringConfig::default(), Overrides::default(), TierTable::default(), None)
            .unwrap()
    }

    fn request(prompt: &str) -> RouteRequest {
        RouteRequest {
            prompt: prompt.to_string(),
            system_prompt: None,
            max_output_tokens: 256,
            session_id: None,
            options: RouteOptions::default(),
        }
    }

    #[test]
    fn simple_prompt_routes_to_simple_tier_model() {
        let orch = orchestrator();
        let decision = orch.route(&request("What is the capital of France?"));
        assert_eq!(decision.tier, Tier::Simple);
        assert_eq!(decision.model, "gemini-2.5-flash");
    }

    #[test]
    fn reasoning_prompt_routes_to_reasoning_tier() {
        let orch = orchestrator();
        let decision = orch.route(&request("Analyze and prove this algorithm's correctness step by step."));
        assert_eq!(decision.tier, Tier::Reasoning);
        assert_eq!(decision.model, "grok-4-fast-reasoning");
    }

    #[test]
    fn max_tokens_override_forces_complex_or_higher() {
        let orch = orchestrator();
        let mut req = request("hi");
        req.system_prompt = Some("x".repeat(500_000));
        let decision = orch.route(&req);
        assert!(decision.tier >= Tier::Complex);
    }

    #[test]
    fn structured_output_request_gets_a_floor() {
        let orch = orchestrator();
        let decision = orch.route(&request("return only valid json matching this schema"));
        assert!(decision.tier >= Tier::Medium);
    }

    #[test]
    fn agentic_request_uses_agentic_table_when_configured() {
        let mut agentic_map = HashMap::new();
        for tier in Tier::ALL {
            agentic_map.insert(
                tier,
                routecraft_types::TierModels { primary: format!("agentic-{tier}"), fallback: vec![] },
            );
        }
        let agentic_table = TierTable::new(agentic_map).unwrap();
        let orch = RouteOrchestrator::new(
            ScoringConfig::default(),
            Overrides::default(),
            TierTable::default(),
            Some(agentic_table),
        )
        .unwrap();

        let mut req = request("please summarize this");
        req.options.agentic_mode = true;
        let decision = orch.route(&req);
        assert!(decision.model.starts_with("agentic-"));
    }

    #[test]
    fn session_pin_is_honored_on_second_call() {
        let orch = orchestrator();
        let mut req = request("implement a quicksort function");
        req.session_id = Some("sess-1".to_string());
        let first = orch.route(&req);

        let mut follow_up = request("ok thanks");
        follow_up.session_id = Some("sess-1".to_string());
        let second = orch.route(&follow_up);

        assert_eq!(second.model, first.model);
        assert_eq!(second.method, "session_pin");
    }

    #[test]
    fn feedback_updates_health_and_stats() {
        let orch = orchestrator();
        let decision = orch.route(&request("write a haiku about the sea"));
        orch.record_feedback(&decision, &ObservedOutcome::success(80));
        let stats = orch.stats();
        assert!(stats.dimension_weights.contains_key("creative_markers"));
    }

    #[test]
    fn router_stats_serialize_to_json() {
        let orch = orchestrator();
        let decision = orch.route(&request("summarize this article"));
        orch.record_feedback(&decision, &ObservedOutcome::success(90));
        let stats = orch.stats();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("dimension_weights"));
        assert!(json.contains("tier_performance"));
    }

    #[test]
    fn repeated_failures_on_pinned_session_eventually_unpins() {
        let orch = orchestrator();
        let mut req = request("implement a parser");
        req.session_id = Some("sess-2".to_string());
        let decision = orch.route(&req);

        for _ in 0..5 {
            orch.record_feedback(&decision, &ObservedOutcome::failure(ErrorKind::Server5xx));
        }

        // Degraded session should fall through to fresh classification
        // rather than reusing the pin.
        let next = orch.route(&req);
        assert_ne!(next.method, "session_pin");
    }

    #[test]
    fn degraded_session_restores_original_model_after_recovery() {
        let mut table_map = HashMap::new();
        table_map.insert(
            Tier::Medium,
            routecraft_types::TierModels {
                primary: "model-a".into(),
                fallback: vec!["model-b".into()],
            },
        );
        for tier in [Tier::Simple, Tier::Complex, Tier::Reasoning] {
            table_map.insert(
                tier,
                routecraft_types::TierModels { primary: format!("{tier}-model"), fallback: vec![] },
            );
        }
        let table = TierTable::new(table_map).unwrap();
        let orch =
            RouteOrchestrator::new(ScoringConfig::default(), Overrides::default(), table, None).unwrap();

        // Crafted to land solidly in the MEDIUM band, comfortably clear of
        // the boundaries and their fuzzy zones, without tripping the
        // reasoning-keyword override, so it resolves to `model-a` via the
        // custom table above.
        let mut req = request(
            "Implement and build this rate limiter `code`, optimize the algorithm's \
             concurrency using an async protocol with a schema, and it must support \
             at least 100 rps, only use approved libraries, as required, returning \
             json in a table.",
        );
        req.session_id = Some("sess-restore".to_string());
        let first = orch.route(&req);
        assert_eq!(first.model, "model-a");

        // Three consecutive failures crosses the session's own degradation
        // threshold while leaving `model-a` merely `Degraded` (not cooled
        // down) in the health tracker, so it is still available for
        // restoration once the session recovers.
        for _ in 0..3 {
            orch.record_feedback(&first, &ObservedOutcome::failure(ErrorKind::Server5xx));
        }

        let degraded = orch.route(&req);
        assert_eq!(degraded.model, "model-b");
        assert_ne!(degraded.method, "session_pin");

        for _ in 0..2 {
            orch.record_feedback(&degraded, &ObservedOutcome::success(80));
        }

        let recovered = orch.route(&req);
        assert_eq!(recovered.method, "session_pin");
        assert_eq!(recovered.model, "model-a");
    }
}
