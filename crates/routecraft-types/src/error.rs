//! Error types for the routecraft routing engine.
//!
//! Construction-time failures (bad config) are distinguished from runtime
//! failure signals fed back via `record_feedback` -- the latter never
//! produce a [`RouterError`], since classification itself cannot fail.

use thiserror::Error;

/// Construction-time error for a malformed [`crate::config::ScoringConfig`]
/// or [`crate::config::TierTable`].
///
/// Carries the offending field path so a caller can report precisely what
/// to fix, rather than a single opaque message.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    /// A required field was missing or empty (e.g. no tiers configured).
    #[error("invalid config at `{field}`: {message}")]
    InvalidConfig {
        /// Dotted path of the offending field, e.g. `tier_table.reasoning`.
        field: String,
        /// Human-readable description of the problem.
        message: String,
    },

    /// Dimension weights did not sum to a usable total.
    #[error("dimension weights at `{field}` sum to {sum}, expected > 0")]
    WeightsDoNotSum {
        /// Field path of the weight map.
        field: String,
        /// The sum that was computed.
        sum: f64,
    },

    /// Tier boundaries were not strictly increasing.
    #[error("tier boundaries at `{field}` must be strictly increasing, got {values:?}")]
    BoundariesNotMonotonic {
        /// Field path of the boundary triple.
        field: String,
        /// The offending values.
        values: Vec<f64>,
    },
}

/// Convenience alias for construction-time results.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Upstream failure taxonomy reported through `record_feedback`.
///
/// This is not a [`RouterError`] -- it is a classification of what went
/// wrong on the provider side, used by the health tracker and adaptive
/// weight manager to decide how to react. A request that simply succeeded
/// with poor output carries `None` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// The upstream call exceeded its deadline.
    Timeout,
    /// The provider rate-limited the request.
    RateLimit,
    /// The provider returned a 5xx-class server error.
    Server5xx,
    /// Authentication/authorization was rejected.
    Auth,
    /// Payment was required and not available (out of scope to resolve here).
    PaymentRequired,
    /// The caller canceled the request before completion.
    Canceled,
    /// Anything not covered above.
    Other,
}
