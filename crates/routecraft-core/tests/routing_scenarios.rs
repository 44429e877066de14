//! End-to-end routing scenarios.
//!
//! Verifies that the orchestrator's subsystems (fingerprinting,
//! classification, caching, health tracking, session pinning) behave
//! correctly together, not just in isolation.

use routecraft_core::RouteOrchestrator;
use routecraft_types::{ErrorKind, ObservedOutcome, Overrides, RouteOptions, RouteRequest, ScoringConfig, Tier, TierTable};

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

/// Scenario: a brand-new simple factual question should land on the
/// cheapest tier and its designated model.
#[test]
fn scenario_simple_factual_question() {
    let orch = orchestrator();
    let decision = orch.route(&request("What year did the Berlin Wall fall?"));
    assert_eq!(decision.tier, Tier::Simple);
    assert_eq!(decision.model, "gemini-2.5-flash");
}

/// Scenario: a multi-step agentic coding task should escalate above
/// SIMPLE even without explicit reasoning keywords, due to code presence
/// and imperative verbs.
#[test]
fn scenario_agentic_coding_task_escalates() {
    let orch = orchestrator();
    let mut req = request("Refactor this module:\n```fn main() {}```\nthen run the tests.");
    req.options.agentic_mode = true;
    let decision = orch.route(&req);
    assert!(decision.tier >= Tier::Complex);
}

/// Scenario: a conversation starts simple, gets pinned to a model, and a
/// short follow-up in the same session keeps using that model instead of
/// being reclassified down to SIMPLE.
#[test]
fn scenario_session_pin_survives_a_trivial_follow_up() {
    let orch = orchestrator();
    let mut first = request("Design a distributed rate limiter with sliding windows.");
    first.session_id = Some("conv-42".to_string());
    let initial = orch.route(&first);
    assert!(initial.tier >= Tier::Complex);

    let mut follow_up = request("sounds good");
    follow_up.session_id = Some("conv-42".to_string());
    let next = orch.route(&follow_up);
    assert_eq!(next.model, initial.model);
    assert_eq!(next.method, "session_pin");
}

/// Scenario: a model that repeatedly fails gets deprioritized in favor of
/// a healthier one in the same tier.
#[test]
fn scenario_unhealthy_model_is_avoided() {
    let orch = orchestrator();
    let decision = orch.route(&request("write a product description for a coffee mug"));
    assert_eq!(decision.tier, Tier::Simple);

    for _ in 0..6 {
        orch.record_feedback(&decision, &ObservedOutcome::failure(ErrorKind::Server5xx));
    }

    // Re-routing an equivalent simple request should no longer prefer the
    // now-unhealthy model if an alternative exists; since the default
    // tier table has no fallback for SIMPLE, it still returns the primary
    // (fail open) but the health snapshot reflects the degradation.
    let stats_model = decision.model.clone();
    let second = orch.route(&request("write a short slogan for a coffee mug"));
    assert_eq!(second.model, stats_model);
}

/// Scenario: requesting structured JSON output floors the tier even for
/// an otherwise simple-looking prompt.
#[test]
fn scenario_structured_output_floors_the_tier() {
    let orch = orchestrator();
    let decision = orch.route(&request("give me the weather, return only json"));
    assert!(decision.tier >= Tier::Medium);
}

/// Scenario: feedback accumulates into reportable stats without panicking
/// across a mixed batch of outcomes.
#[test]
fn scenario_feedback_loop_updates_stats() {
    let orch = orchestrator();
    let ok = orch.route(&request("summarize this paragraph"));
    orch.record_feedback(&ok, &ObservedOutcome::success(120));

    let hard = orch.route(&request("architect a fault-tolerant consensus protocol, analyze trade-offs"));
    orch.record_feedback(&hard, &ObservedOutcome::failure(ErrorKind::Timeout));

    let stats = orch.stats();
    assert!(stats.cache_entries >= 1);
    assert!(!stats.dimension_weights.is_empty());
}
