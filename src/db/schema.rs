//! Schema reflection.
//!
//! Reads `(table, column)` pairs from the catalog of the database's
//! user-visible namespace and folds them into a [`SchemaDocument`] snapshot.
//! One query, one document: if the query fails nothing is returned, and the
//! document is never partially populated.

use sqlx::{PgConnection, Row};
use tracing::debug;

use crate::error::ReflectionError;
use crate::models::SchemaDocument;

/// Namespace reflected by default.
pub const DEFAULT_NAMESPACE: &str = "public";

mod queries {
    pub const LIST_COLUMNS: &str = r#"
        SELECT table_name, column_name
        FROM information_schema.columns
        WHERE table_schema = $1
        "#;
}

/// Read-only reflection of table/column structure.
pub struct SchemaReflector;

impl SchemaReflector {
    /// Reflect the `public` namespace on the given connection.
    pub async fn reflect(conn: &mut PgConnection) -> Result<SchemaDocument, ReflectionError> {
        Self::reflect_namespace(conn, DEFAULT_NAMESPACE).await
    }

    /// Reflect a specific namespace.
    ///
    /// Row order is taken as returned by the database: tables appear in the
    /// document in first-seen order and columns in arrival order.
    pub async fn reflect_namespace(
        conn: &mut PgConnection,
        namespace: &str,
    ) -> Result<SchemaDocument, ReflectionError> {
        let rows = sqlx::query(queries::LIST_COLUMNS)
            .bind(namespace)
            .fetch_all(&mut *conn)
            .await?;

        let mut document = SchemaDocument::new();
        for row in &rows {
            let table: String = row.get("table_name");
            let column: String = row.get("column_name");
            document.push_column(table, column);
        }

        debug!(
            namespace,
            tables = document.len(),
            columns = rows.len(),
            "reflected schema"
        );
        Ok(document)
    }
}
