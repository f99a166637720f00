//! Bastion Policy - relation tuple store and permission evaluation
//!
//! The authorization schema is compiled into the binary ([`schema::SCHEMA`]).
//! [`PolicyEngine`] validates and persists tuples through a
//! [`PolicyRepository`](bastion_core::PolicyRepository) and answers checks
//! against a single store snapshot per call.

pub mod cache;
pub mod engine;
pub mod evaluator;
pub mod schema;
pub mod store;
pub mod traced;

pub use cache::{CacheMetrics, CheckCache, CheckCacheConfig};
pub use engine::PolicyEngine;
pub use evaluator::{Evaluator, MAX_DEPTH};
pub use schema::{Schema, SCHEMA};
pub use store::RelationStore;
pub use traced::TracedAuthorizer;

#[cfg(test)]
mod tests;
