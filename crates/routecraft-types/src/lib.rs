//! # routecraft-types
//!
//! Shared data model for the routecraft routing engine: the [`Tier`]
//! alphabet, the [`config::ScoringConfig`] / [`config::TierTable`]
//! configuration surface, the request/decision/outcome types exchanged
//! across `route` / `record_feedback`, and the crate's error types.
//!
//! This crate has no runtime behavior of its own -- it exists so
//! `routecraft-core`'s five subsystems and any front-end built on top of
//! them share one definition of what a routing decision looks like.

pub mod config;
pub mod decision;
pub mod error;
pub mod tier;

pub use config::{KeywordLists, Overrides, ScoringConfig, TierModels, TierTable, DIMENSIONS};
pub use decision::{ObservedOutcome, RouteOptions, RouteRequest, RoutingDecision};
pub use error::{ErrorKind, Result, RouterError};
pub use tier::Tier;
