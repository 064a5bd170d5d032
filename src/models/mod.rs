//! Data models shared across the access layer.

pub mod schema;

pub use schema::{SchemaDocument, TableColumns};
