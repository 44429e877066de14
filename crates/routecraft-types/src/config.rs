//! Typed configuration for the scoring engine and its tier/model table.
//!
//! Mirrors the defaulting conventions of a `RoutingConfig`: every optional
//! key carries `#[serde(default)]` so a caller can supply a partial JSON
//! document and get sane values for the rest.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::tier::Tier;

/// The fifteen scoring dimensions, in the order the classifier evaluates
/// them. Kept as a fixed list (rather than letting `dimension_weights`
/// invent keys) so a typo in config surfaces at validation time.
pub const DIMENSIONS: [&str; 15] = [
    "token_count",
    "code_presence",
    "reasoning_markers",
    "technical_terms",
    "creative_markers",
    "simple_indicators",
    "multi_step_patterns",
    "question_complexity",
    "imperative_verbs",
    "constraint_count",
    "output_format",
    "reference_complexity",
    "negation_complexity",
    "domain_specificity",
    "agentic_task",
];

/// Per-dimension weight and keyword/threshold configuration for the rule
/// classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight applied to each dimension's normalized `[0, 1]` score before
    /// summation. Does not need to sum to exactly 1.0 but must sum to a
    /// positive number.
    pub dimension_weights: HashMap<String, f64>,

    /// Three ascending cut points in the weighted score splitting
    /// `SIMPLE | MEDIUM | COMPLEX | REASONING`.
    pub tier_boundaries: (f64, f64, f64),

    /// `(simple, complex)` breakpoints the `token_count` dimension compares
    /// `estimatedTokens` against: below `simple` pulls the score down, above
    /// `complex` pushes it up, in between contributes nothing.
    pub token_count_thresholds: (u32, u32),

    /// Keyword lists consulted by the keyword-based dimensions. English and
    /// CJK terms are mixed in the same list; matching is substring-based
    /// and case-insensitive.
    pub keyword_lists: KeywordLists,

    /// Steepness (`k`) of the logistic function used to turn a weighted
    /// score's distance from its nearest boundary into a confidence value.
    pub confidence_steepness: f64,

    /// Confidence below which a tier decision is treated as ambiguous and
    /// replaced by `Overrides::ambiguous_default_tier`.
    pub confidence_threshold: f64,

    /// Number of consecutive reasoning-marker matches required to force
    /// `REASONING` regardless of the weighted score.
    pub reasoning_override_count: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        // Per-dimension weights, tuned against the acceptance scenarios;
        // adaptive tuning nudges these multiplicatively over time (see
        // `routecraft_core::adaptive`).
        let dimension_weights: HashMap<String, f64> = [
            ("token_count", 0.08),
            ("code_presence", 0.15),
            ("reasoning_markers", 0.18),
            ("technical_terms", 0.10),
            ("creative_markers", 0.05),
            ("simple_indicators", 0.02),
            ("multi_step_patterns", 0.12),
            ("question_complexity", 0.05),
            ("imperative_verbs", 0.03),
            ("constraint_count", 0.04),
            ("output_format", 0.03),
            ("reference_complexity", 0.02),
            ("negation_complexity", 0.01),
            ("domain_specificity", 0.02),
            ("agentic_task", 0.04),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            dimension_weights,
            tier_boundaries: (0.0, 0.18, 0.40),
            token_count_thresholds: (50, 500),
            keyword_lists: KeywordLists::default(),
            confidence_steepness: 12.0,
            confidence_threshold: 0.7,
            reasoning_override_count: 2,
        }
    }
}

impl ScoringConfig {
    /// Validate this configuration, collecting every problem found rather
    /// than stopping at the first one.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        let weight_sum: f64 = self.dimension_weights.values().sum();
        if !(weight_sum > 0.0) || !weight_sum.is_finite() {
            issues.push(RouterError::WeightsDoNotSum {
                field: "dimension_weights".into(),
                sum: weight_sum,
            });
        }

        for dim in DIMENSIONS {
            if !self.dimension_weights.contains_key(dim) {
                issues.push(RouterError::InvalidConfig {
                    field: format!("dimension_weights.{dim}"),
                    message: "missing weight for a required dimension".into(),
                });
            }
        }

        let (b1, b2, b3) = self.tier_boundaries;
        if !(b1 < b2 && b2 < b3) {
            issues.push(RouterError::BoundariesNotMonotonic {
                field: "tier_boundaries".into(),
                values: vec![b1, b2, b3],
            });
        }

        let (simple, complex) = self.token_count_thresholds;
        if !(simple < complex) {
            issues.push(RouterError::BoundariesNotMonotonic {
                field: "token_count_thresholds".into(),
                values: vec![simple as f64, complex as f64],
            });
        }

        // Surface only the first collected issue; callers that want the
        // full list should call `validate_all` instead.
        if let Some(first) = issues.into_iter().next() {
            return Err(first);
        }
        Ok(())
    }

    /// Like [`Self::validate`] but returns every problem found instead of
    /// only the first.
    pub fn validate_all(&self) -> Vec<RouterError> {
        let mut issues = Vec::new();

        let weight_sum: f64 = self.dimension_weights.values().sum();
        if !(weight_sum > 0.0) || !weight_sum.is_finite() {
            issues.push(RouterError::WeightsDoNotSum {
                field: "dimension_weights".into(),
                sum: weight_sum,
            });
        }

        for dim in DIMENSIONS {
            if !self.dimension_weights.contains_key(dim) {
                issues.push(RouterError::InvalidConfig {
                    field: format!("dimension_weights.{dim}"),
                    message: "missing weight for a required dimension".into(),
                });
            }
        }

        let (b1, b2, b3) = self.tier_boundaries;
        if !(b1 < b2 && b2 < b3) {
            issues.push(RouterError::BoundariesNotMonotonic {
                field: "tier_boundaries".into(),
                values: vec![b1, b2, b3],
            });
        }

        let (simple, complex) = self.token_count_thresholds;
        if !(simple < complex) {
            issues.push(RouterError::BoundariesNotMonotonic {
                field: "token_count_thresholds".into(),
                values: vec![simple as f64, complex as f64],
            });
        }

        issues
    }

    /// Current weight for a dimension, or `0.0` if unconfigured.
    pub fn weight_of(&self, dimension: &str) -> f64 {
        self.dimension_weights.get(dimension).copied().unwrap_or(0.0)
    }
}

/// Keyword lists for every keyword-driven dimension, multilingual (English
/// plus a small set of CJK terms for the markers most likely to appear in
/// non-English prompts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordLists {
    pub reasoning_markers: Vec<String>,
    pub code_markers: Vec<String>,
    pub technical_terms: Vec<String>,
    pub creative_markers: Vec<String>,
    pub simple_indicators: Vec<String>,
    pub imperative_verbs: Vec<String>,
    pub output_format_markers: Vec<String>,
    pub reference_markers: Vec<String>,
    pub negation_markers: Vec<String>,
    pub domain_terms: Vec<String>,
    pub agentic_verbs: Vec<String>,
    pub constraint_phrases: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordLists {
    fn default() -> Self {
        Self {
            reasoning_markers: owned(&[
                "analyze", "prove", "derive", "architect", "design a system",
                "why does", "step by step", "reason about", "trade-off",
                "分析", "证明", "推导", "解释原理",
            ]),
            code_markers: owned(&[
                "function", "def ", "class ", "```", "algorithm", "variable",
                "recursion", "endpoint", "regex", "compile", "代码", "函数",
            ]),
            technical_terms: owned(&[
                "algorithm", "complexity", "concurrency", "mutex", "kernel",
                "compiler", "protocol", "async", "schema", "latency",
                "架构", "并发", "协议",
            ]),
            creative_markers: owned(&[
                "write a story", "poem", "imagine", "brainstorm", "creative",
                "fictional", "metaphor", "写一首诗", "故事",
            ]),
            simple_indicators: owned(&[
                "what is", "define", "translate", "spell", "what time",
                "yes or no", "是什么", "翻译",
            ]),
            imperative_verbs: owned(&[
                "implement", "build", "fix", "refactor", "optimize",
                "write", "create", "generate", "实现", "修复",
            ]),
            output_format_markers: owned(&[
                "json", "table", "markdown", "csv", "yaml", "bullet points",
                "return only", "schema",
            ]),
            reference_markers: owned(&[
                "as above", "the previous", "like before", "same as",
                "see earlier", "如前所述",
            ]),
            negation_markers: owned(&[
                "do not", "don't", "never", "without", "avoid", "不要", "不能",
            ]),
            domain_terms: owned(&[
                "kubernetes", "blockchain", "cryptography", "distributed systems",
                "machine learning", "embedding", "gradient",
            ]),
            agentic_verbs: owned(&[
                "call the tool", "use the function", "run the command",
                "execute", "invoke", "search the web", "read the file",
            ]),
            constraint_phrases: owned(&[
                "must", "should", "at least", "no more than", "only use",
                "exactly", "within", "limited to", "required", "必须", "只能",
            ]),
        }
    }
}

/// Overrides applied after the base tier/confidence computation, in the
/// order the route orchestrator applies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    /// Tier assigned when confidence falls below
    /// `ScoringConfig::confidence_threshold`.
    pub ambiguous_default_tier: Tier,

    /// Minimum tier forced when the request asks for structured output
    /// (JSON/schema-constrained) regardless of the raw score.
    pub structured_output_min_tier: Tier,

    /// `estimatedTokens` above which the tier is forced to `COMPLEX` with
    /// confidence `0.95`, independent of dimension scoring -- a large
    /// enough prompt+system context is complex regardless of what the
    /// dimensions think of its phrasing.
    pub max_tokens_force_complex: u32,

    /// Whether an agentic tier table, if configured, may be selected at
    /// all. Per-call agentic-ness is carried on `RouteOptions::agentic_mode`
    /// (set by the front-end when the request carries a non-empty `tools`
    /// array) or by the classifier's `agentic_score` crossing `0.75`.
    pub agentic_mode_enabled: bool,

    /// Parallel tier-to-model table biased toward models with long tool
    /// chains, selected in place of the default table when agentic mode
    /// applies. `None` means no agentic table is configured, so the
    /// default table is always used.
    pub agentic_tiers: Option<TierTable>,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            ambiguous_default_tier: Tier::Medium,
            structured_output_min_tier: Tier::Medium,
            max_tokens_force_complex: 100_000,
            agentic_mode_enabled: true,
            agentic_tiers: None,
        }
    }
}

/// A tier's candidate models, preference-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    pub primary: String,
    pub fallback: Vec<String>,
}

impl TierModels {
    /// All candidate models for this tier, primary first.
    pub fn candidates(&self) -> Vec<&str> {
        std::iter::once(self.primary.as_str())
            .chain(self.fallback.iter().map(String::as_str))
            .collect()
    }
}

/// Maps each tier to its candidate models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable(HashMap<Tier, TierModels>);

impl TierTable {
    /// Construct from an explicit map, validating it is non-empty and
    /// covers every tier.
    pub fn new(map: HashMap<Tier, TierModels>) -> Result<Self> {
        for tier in Tier::ALL {
            if !map.contains_key(&tier) {
                return Err(RouterError::InvalidConfig {
                    field: format!("tier_table.{tier}"),
                    message: "no models configured for this tier".into(),
                });
            }
        }
        Ok(Self(map))
    }

    pub fn get(&self, tier: Tier) -> Option<&TierModels> {
        self.0.get(&tier)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(
            Tier::Simple,
            TierModels { primary: "gemini-2.5-flash".into(), fallback: vec![] },
        );
        map.insert(
            Tier::Medium,
            TierModels { primary: "grok-code-fast-1".into(), fallback: vec![] },
        );
        map.insert(
            Tier::Complex,
            TierModels { primary: "gemini-2.5-pro".into(), fallback: vec![] },
        );
        map.insert(
            Tier::Reasoning,
            TierModels { primary: "grok-4-fast-reasoning".into(), fallback: vec![] },
        );
        Self(map)
    }
}
