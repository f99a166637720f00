//! API request handlers

pub mod auth;
pub mod authz;
pub mod domains;
pub mod health;
pub mod invitations;

pub use health::{health_check, liveness, readiness};
