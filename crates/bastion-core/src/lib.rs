//! Bastion Core - Domain types and traits for the authorization core

pub mod context;
pub mod error;
pub mod ids;
pub mod models;
pub mod relations;
pub mod traits;

pub use context::*;
pub use error::*;
pub use ids::*;
pub use models::*;
pub use relations::*;
pub use traits::*;

#[cfg(test)]
mod tests;
