//! Storage layer for Bastion: PostgreSQL repositories and an in-memory backend

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repositories;

pub use memory::MemoryStore;
pub use migrations::run_migrations;
pub use pool::{create_pool, DatabaseConfig};
pub use repositories::*;
