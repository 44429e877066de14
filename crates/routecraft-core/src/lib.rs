//! # routecraft-core
//!
//! The routing and classification core of a local LLM request router:
//! prompt fingerprinting, a weighted rule classifier, a fuzzy-boundary
//! score cache, an adaptive weight manager, a global model health
//! tracker, per-session model pinning, and the orchestrator that wires
//! them together into one `route` call.
//!
//! Everything in this crate is CPU-bound and non-suspending -- no
//! `async fn` appears anywhere here. The upstream HTTP call this crate's
//! decisions feed into, and the outcome of that call, are the caller's
//! responsibility; this crate only decides *which* model to try and
//! learns from whatever the caller reports back afterward.

pub mod adaptive;
pub mod cache;
pub mod classifier;
pub mod fingerprint;
pub mod health;
pub mod orchestrator;
pub mod session;

pub use adaptive::{AdaptiveWeights, DimensionPerformance, TierPerformance};
pub use cache::{CachedScore, ScoreCache};
pub use classifier::{DimensionScore, RuleClassifier, ScoringResult};
pub use fingerprint::{compute as compute_fingerprint, FeatureTag, Fingerprint};
pub use health::{HealthStatusLabel, HealthTracker, ModelHealthSnapshot};
pub use orchestrator::{RouteOrchestrator, RouterStats};
pub use session::{ContextSnapshot, SessionStore, SessionView};
