//! Database access layer.
//!
//! This module provides the database-facing functionality:
//! - Lifecycle-managed connection pooling
//! - Leased connections and scoped transactions
//! - Schema reflection for the translation component

pub mod lease;
pub mod pool;
pub mod schema;

pub use lease::{LeasedConnection, TransactionScope};
pub use pool::{DatabasePool, PoolPhase, PoolStatistics};
pub use schema::SchemaReflector;
