//! Column discovery from the system catalog.
//!
//! `pg_attribute` + `format_type` works on empty tables and reports declared
//! types with their modifiers, which is what casts need.

use pg_escape::quote_identifier;
use tokio_postgres::Client;

const TABLE_COLUMNS_SQL: &str = "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod), NOT a.attnotnull \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attrelid = to_regclass($1::text) AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogColumn {
    pub(crate) name: String,
    /// Declared type as printed by `format_type`.
    pub(crate) pg_type: String,
    pub(crate) nullable: bool,
}

impl CatalogColumn {
    #[cfg(test)]
    pub(crate) fn new(name: &str, pg_type: &str, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            pg_type: pg_type.to_string(),
            nullable,
        }
    }
}

/// `"schema"."table"`, quoting only where needed.
pub(crate) fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// Live columns of `schema.table` in ordinal order; empty when the table
/// does not exist.
pub(crate) async fn table_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<CatalogColumn>, tokio_postgres::Error> {
    let rows = client
        .query(TABLE_COLUMNS_SQL, &[&qualified_table(schema, table)])
        .await?;
    rows.iter()
        .map(|row| {
            Ok(CatalogColumn {
                name: row.try_get(0)?,
                pg_type: row.try_get(1)?,
                nullable: row.try_get(2)?,
            })
        })
        .collect()
}
