//! askdb - database access layer for text-to-SQL services.
//!
//! This library owns two things on behalf of a natural-language-to-SQL
//! backend: a lifecycle-managed PostgreSQL connection pool, and a schema
//! reflector that turns live catalog metadata into a structured document
//! for a downstream translation component.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{PoolConfig, Settings};
pub use db::{DatabasePool, LeasedConnection, SchemaReflector, TransactionScope};
pub use error::{ConfigError, PoolError, ReflectionError};
pub use models::SchemaDocument;
