//! Relational table loader: multi-row `INSERT` with positional parameters.
//!
//! Each block is written inside one pooled transaction, in chunks of at
//! most [`INSERT_CHUNK_ROWS`] rows. Values are bound with their Arrow-native
//! parameter type and the server casts them to the target columns; text
//! values headed for non-text columns get an explicit cast.

use std::fmt::Write as _;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use blockline_types::loader::RelationalTableLoaderConfig;
use blockline_types::{ConnectorError, DataBlock, Payload};
use pg_escape::quote_identifier;
use tokio_postgres::types::ToSql;

use super::Loader;
use crate::pool::{RelationalPool, Session};
use crate::postgres::catalog::{qualified_table, table_columns, CatalogColumn};
use crate::postgres::identifier::validate_pg_identifier;
use crate::postgres::typed_col::{
    downcast_columns, normalize_for_insert, sql_param_value, SqlParamValue, TypedCol,
};
use crate::postgres::types::base_type_name;

const TYPE_TAG: &str = "relationalTable";

pub(crate) const INSERT_CHUNK_ROWS: usize = 1000;

/// Server-side limit on bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

pub struct RelationalTableLoader {
    config: RelationalTableLoaderConfig,
    session: Option<Session<RelationalPool>>,
    targets: Option<Vec<CatalogColumn>>,
}

impl RelationalTableLoader {
    /// Parse and check a `relationalTable` loader body.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` on schema or semantic problems.
    pub fn validate_config(raw: &serde_json::Value) -> Result<RelationalTableLoaderConfig, ConnectorError> {
        let config: RelationalTableLoaderConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::config(format!("relationalTable loader: {e}")))?;
        config
            .conn_config
            .as_relational("relationalTable loader")?
            .validate()?;
        validate_pg_identifier("schema", &config.schema)?;
        validate_pg_identifier("table", &config.table)?;
        Ok(config)
    }

    #[must_use]
    pub fn new(config: &RelationalTableLoaderConfig) -> Self {
        Self {
            config: config.clone(),
            session: None,
            targets: None,
        }
    }

    async fn ensure_ready(&mut self) -> Result<(), ConnectorError> {
        if self.session.is_none() {
            let conn = self.config.conn_config.as_relational("relationalTable loader")?;
            self.session = Some(Session::new(RelationalPool::connect(conn).await?));
        }
        if self.targets.is_some() {
            return Ok(());
        }
        let Some(session) = self.session.as_ref() else {
            return Err(ConnectorError::connection("relational session unavailable"));
        };
        let (schema, table) = (self.config.schema.clone(), self.config.table.clone());
        let targets = session
            .scope(|h| async move {
                table_columns(h.client(), &schema, &table)
                    .await
                    .map_err(|e| ConnectorError::load(format!("column discovery failed: {e}")))
            })
            .await?;
        if targets.is_empty() {
            return Err(ConnectorError::load(format!(
                "target table {} does not exist",
                qualified_table(&self.config.schema, &self.config.table)
            )));
        }
        self.targets = Some(targets);
        Ok(())
    }
}

/// Placeholder for parameter `n`: the Arrow-native type, or an explicit cast
/// when text must land in a non-text column.
fn placeholder(n: usize, col: &TypedCol<'_>, target_type: &str) -> String {
    let text_target = matches!(
        base_type_name(target_type).as_str(),
        "text" | "character varying" | "character" | "bpchar" | "name" | "citext"
    );
    match col {
        TypedCol::Utf8(_) | TypedCol::Null if !text_target => format!("CAST(${n}::text AS {target_type})"),
        _ => format!("${n}::{}", col.param_type()),
    }
}

/// Declared target type for each batch column, in batch order.
fn target_types<'a>(
    batch: &RecordBatch,
    targets: &'a [CatalogColumn],
) -> Result<Vec<&'a str>, ConnectorError> {
    let schema = batch.schema();
    let mut missing = Vec::new();
    let types: Vec<&str> = schema
        .fields()
        .iter()
        .filter_map(|f| {
            let found = targets.iter().find(|t| t.name == *f.name());
            if found.is_none() {
                missing.push(f.name().clone());
            }
            found.map(|t| t.pg_type.as_str())
        })
        .collect();
    if !missing.is_empty() {
        return Err(ConnectorError::load(format!(
            "columns not present in target table: {}",
            missing.join(", ")
        )));
    }
    Ok(types)
}

fn rows_per_chunk(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).clamp(1, INSERT_CHUNK_ROWS)
}

/// `INSERT INTO <table> (<cols>) VALUES (...), ...` for rows `start..end`,
/// with the matching parameters.
fn build_insert<'a>(
    header: &str,
    typed: &[TypedCol<'a>],
    types: &[&str],
    start: usize,
    end: usize,
) -> (String, Vec<SqlParamValue<'a>>) {
    let mut sql = String::with_capacity(header.len() + (end - start) * typed.len() * 12);
    sql.push_str(header);
    let mut params = Vec::with_capacity((end - start) * typed.len());
    for row in start..end {
        if row > start {
            sql.push_str(", ");
        }
        sql.push('(');
        for (pos, (col, target)) in typed.iter().zip(types).enumerate() {
            if pos > 0 {
                sql.push_str(", ");
            }
            params.push(sql_param_value(col, row));
            sql.push_str(&placeholder(params.len(), col, target));
        }
        sql.push(')');
    }
    (sql, params)
}

async fn insert_batch(
    client: &tokio_postgres::Client,
    qualified: &str,
    batch: &RecordBatch,
    types: &[&str],
) -> Result<u64, ConnectorError> {
    let columns = normalize_for_insert(batch)?;
    let typed = downcast_columns(&columns);
    let schema = batch.schema();
    let col_list = schema
        .fields()
        .iter()
        .map(|f| quote_identifier(f.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut header = String::new();
    let _ = write!(header, "INSERT INTO {qualified} ({col_list}) VALUES ");

    let num_rows = batch.num_rows();
    let mut written = 0u64;
    for start in (0..num_rows).step_by(rows_per_chunk(typed.len())) {
        let end = (start + rows_per_chunk(typed.len())).min(num_rows);
        let (sql, params) = build_insert(&header, &typed, types, start, end);
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParamValue::as_tosql).collect();
        written += client
            .execute(sql.as_str(), &refs)
            .await
            .map_err(|e| ConnectorError::load(format!("insert into {qualified} failed: {e}")))?;
    }
    Ok(written)
}

#[async_trait]
impl Loader for RelationalTableLoader {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        false
    }

    async fn push(&mut self, block: &DataBlock) -> Result<(), ConnectorError> {
        let batch = match &block.data {
            Payload::Table(batch) => batch,
            Payload::Files(files) if files.is_empty() => return Ok(()),
            Payload::Files(_) => {
                return Err(ConnectorError::load(
                    "relationalTable loader accepts table payloads only",
                ))
            }
        };
        if batch.num_rows() == 0 {
            return Ok(());
        }

        self.ensure_ready().await?;
        let (Some(session), Some(targets)) = (self.session.as_ref(), self.targets.as_deref()) else {
            return Err(ConnectorError::connection("relational session unavailable"));
        };
        let types = target_types(batch, targets)?;
        let qualified = qualified_table(&self.config.schema, &self.config.table);

        let written = session
            .scope(|h| {
                let qualified = qualified.clone();
                async move { insert_batch(h.client(), &qualified, batch, &types).await }
            })
            .await?;
        tracing::debug!(table = %qualified, rows = written, "inserted block");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("amount", DataType::Utf8, true),
            Field::new("note", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("9.50"), None])),
                Arc::new(StringArray::from(vec![Some("a"), Some("b")])),
            ],
        )
        .unwrap()
    }

    fn targets() -> Vec<CatalogColumn> {
        vec![
            CatalogColumn::new("id", "bigint", false),
            CatalogColumn::new("amount", "numeric(10,2)", true),
            CatalogColumn::new("note", "character varying(40)", true),
        ]
    }

    #[test]
    fn insert_casts_text_into_typed_columns() {
        let b = batch();
        let targets = targets();
        let types = target_types(&b, &targets).unwrap();
        let cols = normalize_for_insert(&b).unwrap();
        let typed = downcast_columns(&cols);
        let (sql, params) = build_insert("INSERT INTO t (id, amount, note) VALUES ", &typed, &types, 0, 2);
        assert_eq!(
            sql,
            "INSERT INTO t (id, amount, note) VALUES \
             ($1::int8, CAST($2::text AS numeric(10,2)), $3::text), \
             ($4::int8, CAST($5::text AS numeric(10,2)), $6::text)"
        );
        assert_eq!(params.len(), 6);
        assert!(matches!(params[4], SqlParamValue::Text(None)));
    }

    #[test]
    fn unknown_columns_are_reported_together() {
        let targets = vec![CatalogColumn::new("id", "bigint", false)];
        let err = target_types(&batch(), &targets).unwrap_err();
        assert!(err.to_string().contains("amount, note"));
    }

    #[test]
    fn chunks_respect_parameter_limit() {
        assert_eq!(rows_per_chunk(3), INSERT_CHUNK_ROWS);
        assert_eq!(rows_per_chunk(200), 327);
        assert_eq!(rows_per_chunk(100_000), 1);
    }

    #[tokio::test]
    async fn empty_blocks_need_no_connection() {
        let cfg = RelationalTableLoaderConfig {
            conn_config: blockline_types::ConnConfig::Relational(
                blockline_types::conn::RelationalConnConfig {
                    host: "127.0.0.1".into(),
                    port: 1,
                    user: "etl".into(),
                    password: String::new(),
                    database: "warehouse".into(),
                    max_conn: 1,
                    min_conn: 1,
                    acquire_timeout_secs: 1,
                },
            ),
            schema: "public".into(),
            table: "events".into(),
        };
        let mut loader = RelationalTableLoader::new(&cfg);
        loader.push(&DataBlock::terminal_files()).await.unwrap();
        loader
            .push(&DataBlock::terminal(Payload::empty_table()))
            .await
            .unwrap();
        let err = loader
            .push(&DataBlock::new(Payload::Files(vec![bytes::Bytes::from_static(b"x")]), None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("table payloads only"));
        assert!(!loader.is_compatible_with_copy_file());
    }
}
