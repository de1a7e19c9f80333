//! PostgreSQL Database Module
//!
//! Stores karma grants.

pub mod grants;
pub mod pool;

pub use grants::GrantRepository;
pub use pool::DatabasePool;
