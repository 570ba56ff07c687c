//! Relational table extractor: pages through a `PostgreSQL` table ordered by
//! its incremental field, one Arrow table per page.

use std::fmt::Write as _;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use blockline_types::block::{BlockMetadata, IncrementalValue};
use blockline_types::ext::RelationalTableExtConfig;
use blockline_types::{ConnectorError, DataBlock, InitMetadata, Payload};
use pg_escape::quote_identifier;
use tokio_postgres::types::ToSql;

use super::{already_exhausted, Extractor};
use crate::pool::{RelationalPool, Session};
use crate::postgres::catalog::{qualified_table, table_columns, CatalogColumn};
use crate::postgres::encode::{rows_to_record_batch, text_column};
use crate::postgres::identifier::validate_pg_identifier;
use crate::postgres::types::{arrow_schema, Column};

const TYPE_TAG: &str = "relationalTable";

/// Result column carrying the incremental field as text; stripped from the
/// table and moved into block metadata.
pub const PRIVATE_INCREMENTAL_COLUMN: &str = "__etl_private_field__incremental_value";

/// Columns and types resolved on the first call.
struct ReadPlan {
    columns: Vec<Column>,
    schema: SchemaRef,
    incremental_type: String,
}

pub struct RelationalTableExtractor {
    config: RelationalTableExtConfig,
    session: Option<Session<RelationalPool>>,
    plan: Option<ReadPlan>,
    page: u64,
    exhausted: bool,
}

pub(crate) struct PageQuery {
    pub(crate) sql: String,
    pub(crate) watermark: Option<String>,
}

impl RelationalTableExtractor {
    /// Parse and check a `relationalTable` extractor body.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` on schema or semantic problems.
    pub fn validate_config(raw: &serde_json::Value) -> Result<RelationalTableExtConfig, ConnectorError> {
        let config: RelationalTableExtConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::config(format!("relationalTable extractor: {e}")))?;
        config
            .conn_config
            .as_relational("relationalTable extractor")?
            .validate()?;
        validate_pg_identifier("schema", &config.schema)?;
        validate_pg_identifier("table", &config.table)?;
        validate_pg_identifier("incrementalField", &config.incremental_field)?;
        if config.batch_size == 0 {
            return Err(ConnectorError::config("relationalTable extractor: batchSize must be >= 1"));
        }
        for field in config.selected_fields.iter().flatten() {
            if field == PRIVATE_INCREMENTAL_COLUMN {
                return Err(ConnectorError::config(format!(
                    "relationalTable extractor: selectedFields must not contain {PRIVATE_INCREMENTAL_COLUMN}"
                )));
            }
            validate_pg_identifier("selected field", field)?;
        }
        Ok(config)
    }

    /// Build an extractor; the pool is created on the first call.
    #[must_use]
    pub fn new(config: &RelationalTableExtConfig) -> Self {
        Self {
            config: config.clone(),
            session: None,
            plan: None,
            page: 0,
            exhausted: false,
        }
    }

    async fn session(&mut self) -> Result<&Session<RelationalPool>, ConnectorError> {
        if self.session.is_none() {
            let conn = self.config.conn_config.as_relational("relationalTable extractor")?;
            let pool = RelationalPool::connect(conn).await?;
            self.session = Some(Session::new(pool));
        }
        self.session
            .as_ref()
            .ok_or_else(|| ConnectorError::connection("relational session unavailable"))
    }

    async fn discover(&mut self) -> Result<(), ConnectorError> {
        if self.plan.is_some() {
            return Ok(());
        }
        let qualified = qualified_table(&self.config.schema, &self.config.table);
        let catalog = {
            let (schema, table) = (self.config.schema.clone(), self.config.table.clone());
            self.session()
                .await?
                .scope(|h| async move {
                    table_columns(h.client(), &schema, &table)
                        .await
                        .map_err(|e| ConnectorError::extract(format!("column discovery failed: {e}")))
                })
                .await?
        };
        let plan = plan_from_catalog(&self.config, &catalog)
            .map_err(|e| ConnectorError::extract(format!("{qualified}: {e}")))?;
        tracing::info!(
            table = %qualified,
            columns = plan.columns.len(),
            incremental_type = %plan.incremental_type,
            "resolved relational source"
        );
        self.plan = Some(plan);
        Ok(())
    }
}

/// Pick the projected columns and the watermark type from the catalog.
fn plan_from_catalog(
    config: &RelationalTableExtConfig,
    catalog: &[CatalogColumn],
) -> Result<ReadPlan, String> {
    if catalog.is_empty() {
        return Err("table not found or has no columns".to_string());
    }
    let lookup = |name: &str| catalog.iter().find(|c| c.name == name);

    let incremental_type = lookup(&config.incremental_field)
        .map(|c| c.pg_type.clone())
        .ok_or_else(|| format!("incremental field '{}' does not exist", config.incremental_field))?;

    let columns = match &config.selected_fields {
        Some(fields) => fields
            .iter()
            .map(|f| {
                lookup(f)
                    .map(|c| Column::new(&c.name, &c.pg_type, c.nullable))
                    .ok_or_else(|| format!("selected field '{f}' does not exist"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => catalog
            .iter()
            .map(|c| Column::new(&c.name, &c.pg_type, c.nullable))
            .collect(),
    };

    Ok(ReadPlan {
        schema: arrow_schema(&columns),
        columns,
        incremental_type,
    })
}

/// `SELECT <cols>, CAST(<incr> AS TEXT) AS <private> FROM <table> [WHERE ...]
/// ORDER BY <order> LIMIT <batch> OFFSET <page * batch>`
pub(crate) fn build_page_query(
    config: &RelationalTableExtConfig,
    columns: &[Column],
    incremental_type: &str,
    page: u64,
) -> PageQuery {
    let incremental = quote_identifier(&config.incremental_field);
    let mut sql = String::from("SELECT ");
    for col in columns {
        let ident = quote_identifier(&col.name);
        if col.needs_cast {
            let _ = write!(sql, "{ident}::text AS {ident}, ");
        } else {
            let _ = write!(sql, "{ident}, ");
        }
    }
    let _ = write!(
        sql,
        "CAST({incremental} AS TEXT) AS {} FROM {}",
        quote_identifier(PRIVATE_INCREMENTAL_COLUMN),
        qualified_table(&config.schema, &config.table)
    );

    let filter = config
        .filter_sql
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let watermark = config.incremental_value.clone();
    match (&watermark, filter) {
        (Some(_), Some(filter)) => {
            let _ = write!(
                sql,
                " WHERE {incremental} {} CAST($1::text AS {incremental_type}) AND ({filter})",
                config.incremental_mode.as_sql()
            );
        }
        (Some(_), None) => {
            let _ = write!(
                sql,
                " WHERE {incremental} {} CAST($1::text AS {incremental_type})",
                config.incremental_mode.as_sql()
            );
        }
        (None, Some(filter)) => {
            let _ = write!(sql, " WHERE ({filter})");
        }
        (None, None) => {}
    }

    let order = config
        .order_sql
        .clone()
        .unwrap_or_else(|| incremental.to_string());
    let batch = config.batch_size as u64;
    let _ = write!(
        sql,
        " ORDER BY {order} LIMIT {batch} OFFSET {}",
        page.saturating_mul(batch)
    );

    PageQuery { sql, watermark }
}

#[async_trait]
impl Extractor for RelationalTableExtractor {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        false
    }

    async fn extract(&mut self, init: &InitMetadata) -> Result<Vec<DataBlock>, ConnectorError> {
        if self.exhausted {
            return Err(already_exhausted(TYPE_TAG));
        }
        self.discover().await?;
        let Some(plan) = self.plan.as_ref() else {
            return Err(ConnectorError::extract("relational read plan unavailable"));
        };

        let PageQuery { sql, watermark } =
            build_page_query(&self.config, &plan.columns, &plan.incremental_type, self.page);
        tracing::debug!(sql = %sql, page = self.page, "querying page");

        let Some(session) = self.session.as_ref() else {
            return Err(ConnectorError::connection("relational session unavailable"));
        };
        let rows = session
            .scope(|h| async move {
                let params: Vec<&(dyn ToSql + Sync)> = watermark
                    .iter()
                    .map(|w| w as &(dyn ToSql + Sync))
                    .collect();
                h.client()
                    .query(sql.as_str(), &params)
                    .await
                    .map_err(|e| ConnectorError::extract(format!("page query failed: {e}")))
            })
            .await?;
        self.page += 1;
        tracing::info!(rows = rows.len(), page = self.page, "extracted page");

        if rows.is_empty() {
            self.exhausted = true;
            let empty = RecordBatch::new_empty(Arc::clone(&plan.schema));
            return Ok(vec![DataBlock::terminal(Payload::Table(empty))]);
        }

        let batch = rows_to_record_batch(&rows, &plan.columns, &plan.schema)?;
        let metadata = BlockMetadata {
            incremental_field: Some(self.config.incremental_field.clone()),
            incremental_value: Some(IncrementalValue::PerRow(text_column(
                &rows,
                plan.columns.len(),
            ))),
            ..BlockMetadata::from_init(init)
        };
        Ok(vec![DataBlock::new(Payload::Table(batch), Some(metadata))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockline_types::conn::{ConnConfig, RelationalConnConfig};
    use blockline_types::ext::IncrementalMode;

    fn config() -> RelationalTableExtConfig {
        RelationalTableExtConfig {
            conn_config: ConnConfig::Relational(RelationalConnConfig {
                host: "db".into(),
                port: 5432,
                user: "etl".into(),
                password: String::new(),
                database: "app".into(),
                max_conn: 2,
                min_conn: 1,
                acquire_timeout_secs: 30,
            }),
            schema: "public".into(),
            table: "orders".into(),
            selected_fields: None,
            filter_sql: None,
            batch_size: 500,
            incremental_field: "updated_at".into(),
            incremental_mode: IncrementalMode::Greater,
            incremental_value: None,
            order_sql: None,
        }
    }

    fn catalog() -> Vec<CatalogColumn> {
        vec![
            CatalogColumn::new("id", "bigint", false),
            CatalogColumn::new("total", "numeric(12,2)", true),
            CatalogColumn::new("updated_at", "timestamp without time zone", false),
        ]
    }

    #[test]
    fn full_scan_query_pages_by_offset() {
        let cfg = config();
        let plan = plan_from_catalog(&cfg, &catalog()).unwrap();
        let q = build_page_query(&cfg, &plan.columns, &plan.incremental_type, 2);
        assert_eq!(
            q.sql,
            "SELECT id, total::text AS total, updated_at, \
             CAST(updated_at AS TEXT) AS __etl_private_field__incremental_value \
             FROM public.orders ORDER BY updated_at LIMIT 500 OFFSET 1000"
        );
        assert!(q.watermark.is_none());
    }

    #[test]
    fn watermark_binds_with_declared_type() {
        let mut cfg = config();
        cfg.incremental_value = Some("2024-01-01 00:00:00".into());
        cfg.incremental_mode = IncrementalMode::GreaterOrEqual;
        cfg.filter_sql = Some("status = 'paid'".into());
        let plan = plan_from_catalog(&cfg, &catalog()).unwrap();
        let q = build_page_query(&cfg, &plan.columns, &plan.incremental_type, 0);
        assert!(q.sql.contains(
            "WHERE updated_at >= CAST($1::text AS timestamp without time zone) AND (status = 'paid')"
        ));
        assert!(q.sql.ends_with("LIMIT 500 OFFSET 0"));
        assert_eq!(q.watermark.as_deref(), Some("2024-01-01 00:00:00"));
    }

    #[test]
    fn filter_without_watermark() {
        let mut cfg = config();
        cfg.filter_sql = Some("  region = 'eu' ".into());
        cfg.order_sql = Some("id DESC".into());
        let plan = plan_from_catalog(&cfg, &catalog()).unwrap();
        let q = build_page_query(&cfg, &plan.columns, &plan.incremental_type, 0);
        assert!(q.sql.contains(" WHERE (region = 'eu') ORDER BY id DESC"));
    }

    #[test]
    fn selected_fields_must_exist() {
        let mut cfg = config();
        cfg.selected_fields = Some(vec!["id".into(), "missing".into()]);
        let err = plan_from_catalog(&cfg, &catalog()).err().unwrap();
        assert!(err.contains("missing"));

        cfg.selected_fields = Some(vec!["id".into()]);
        let plan = plan_from_catalog(&cfg, &catalog()).unwrap();
        assert_eq!(plan.columns.len(), 1);
        assert_eq!(plan.incremental_type, "timestamp without time zone");
    }

    #[test]
    fn unknown_table_or_incremental_field() {
        assert!(plan_from_catalog(&config(), &[]).is_err());
        let mut cfg = config();
        cfg.incremental_field = "nope".into();
        assert!(plan_from_catalog(&cfg, &catalog()).is_err());
    }

    #[test]
    fn validate_rejects_private_column_selection() {
        let mut cfg = config();
        cfg.selected_fields = Some(vec![PRIVATE_INCREMENTAL_COLUMN.into()]);
        let raw = serde_json::to_value(&cfg).unwrap();
        let err = RelationalTableExtractor::validate_config(&raw).unwrap_err();
        assert!(err.to_string().contains("selectedFields"));
    }

    #[test]
    fn validate_rejects_bad_identifiers_and_batch() {
        let mut cfg = config();
        cfg.table = "orders;--".into();
        let raw = serde_json::to_value(&cfg).unwrap();
        assert!(RelationalTableExtractor::validate_config(&raw).is_err());

        let mut cfg = config();
        cfg.batch_size = 0;
        let raw = serde_json::to_value(&cfg).unwrap();
        let err = RelationalTableExtractor::validate_config(&raw).unwrap_err();
        assert!(err.to_string().contains("batchSize"));
    }

    #[test]
    fn never_copy_compatible() {
        let ext = RelationalTableExtractor::new(&config());
        assert!(!ext.is_compatible_with_copy_file());
        assert_eq!(ext.type_tag(), "relationalTable");
    }
}
