//! Request/decision/outcome types exchanged across the `route` /
//! `record_feedback` boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::tier::Tier;

/// A single routing request. Front-end concerns (HTTP body parsing, SSE
/// framing, auth) have already happened by the time this reaches the core;
/// this struct carries only what classification and model selection need.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// The flattened user-turn text to classify.
    pub prompt: String,
    /// System prompt, if any -- contributes to a handful of dimensions
    /// (e.g. `output_format`) but is not classified on its own.
    pub system_prompt: Option<String>,
    /// Caller's requested output budget. Independent of the
    /// `max_tokens_force_complex` override, which compares an estimated
    /// *input* token count (prompt + system prompt) against the threshold.
    pub max_output_tokens: u32,
    /// Conversation identifier for model pinning. `None` means "no
    /// session affinity" -- every call is classified independently.
    pub session_id: Option<String>,
    /// Per-call feature toggles.
    pub options: RouteOptions,
}

/// Per-call overrides of the router's default behavior.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Disable the score cache for this call (always re-classify).
    pub disable_cache: bool,
    /// Disable adaptive weight application for this call.
    pub disable_adaptive: bool,
    /// Disable health-based model filtering for this call.
    pub disable_health_tracking: bool,
    /// Caller already knows this is an agentic (tool-using) turn.
    pub agentic_mode: bool,
}

/// The outcome of a routing decision, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// The difficulty tier the request was classified into.
    pub tier: Tier,
    /// The model selected within that tier.
    pub model: String,
    /// Confidence in the tier assignment, `[0, 1]`.
    pub confidence: f64,
    /// How the decision was reached (`"classifier"`, `"cache"`,
    /// `"session_pin"`, `"override:structured_output"`, etc.) -- useful
    /// for debugging and for `record_feedback` to know which subsystem to
    /// credit or blame.
    pub method: String,
    /// A short human-readable justification, assembled from whichever
    /// dimensions/overrides fired.
    pub reasoning: String,
    /// Free-form metadata (fingerprint id, matched dimension names, cache
    /// age, etc.) for observability. Not part of the routing contract.
    pub meta: HashMap<String, String>,
}

/// A post-hoc signal about how a previously-returned [`RoutingDecision`]
/// actually performed, fed back into the adaptive weight manager and the
/// model health tracker.
#[derive(Debug, Clone)]
pub struct ObservedOutcome {
    /// Whether the upstream call ultimately succeeded.
    pub success: bool,
    /// Round-trip latency in milliseconds, if the call completed.
    pub latency_ms: Option<u64>,
    /// Cost incurred, in the provider's smallest billing unit, if known.
    pub cost: Option<f64>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Failure classification when `success` is `false`.
    pub error_kind: Option<ErrorKind>,
}

impl ObservedOutcome {
    /// Convenience constructor for a clean success.
    pub fn success(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            cost: None,
            input_tokens: None,
            output_tokens: None,
            error_kind: None,
        }
    }

    /// Convenience constructor for a failure.
    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            success: false,
            latency_ms: None,
            cost: None,
            input_tokens: None,
            output_tokens: None,
            error_kind: Some(kind),
        }
    }
}
