//! Database layer
//!
//! SQLite-backed persistence for tenants, storages, sessions and the audit
//! trail. The layer is split into:
//! - `pool`: connection pool factory
//! - `migrations`: embedded schema migrations
//! - `repositories`: one repository trait + sqlx implementation per entity

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool};
