//! Table-mode block transformation.
//!
//! In order: decode file payloads into one table, append the requested
//! lineage columns, append the tag column, then run the configured SQL with
//! the table registered as `data`. Nothing is kept between calls.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use blockline_connectors::FileCodec;
use blockline_types::pipeline::tag_column_name;
use blockline_types::{
    BlockMetadata, ConnectorError, DataBlock, IncrementalValue, Payload, PipelineConfig,
    PrivateField,
};
use bytes::Bytes;
use datafusion::prelude::SessionContext;

/// Name the in-flight table is registered under for `transformSql`.
pub const SQL_TABLE_NAME: &str = "data";

#[derive(Debug, Clone)]
pub struct Transformer {
    codec: Option<FileCodec>,
    prefix: String,
    include: Vec<PrivateField>,
    tag: Option<String>,
    sql: Option<String>,
}

impl Transformer {
    /// Transformer for `config`; `codec` decodes file payloads.
    #[must_use]
    pub fn new(config: &PipelineConfig, codec: Option<FileCodec>) -> Self {
        Self {
            codec,
            prefix: config.private_field_prefix.clone(),
            include: config.include_private_fields.clone(),
            tag: config.tag_name_value.clone(),
            sql: config
                .transform_sql
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    /// Transform one block. A terminal block carrying rows is transformed
    /// like any other and keeps its terminal flag; an empty one is only
    /// normalised to a table.
    ///
    /// # Errors
    ///
    /// Returns `Codec` when a file cannot be decoded and `Transform` for
    /// lineage or SQL failures.
    pub async fn transform(&self, block: DataBlock) -> Result<DataBlock, ConnectorError> {
        let DataBlock {
            is_end,
            data,
            metadata,
        } = block;
        let table = self.to_table(data)?;
        if is_end && table.num_rows() == 0 {
            return Ok(DataBlock::terminal(Payload::Table(table)));
        }

        let table = self.append_lineage(table, metadata.as_ref())?;
        let table = match &self.sql {
            Some(sql) => run_sql(sql, table).await?,
            None => table,
        };
        let mut out = DataBlock::new(Payload::Table(table), metadata);
        out.is_end = is_end;
        Ok(out)
    }

    fn to_table(&self, data: Payload) -> Result<RecordBatch, ConnectorError> {
        match data {
            Payload::Table(batch) => Ok(batch),
            Payload::Files(files) if files.is_empty() => Ok(RecordBatch::new_empty(Arc::new(Schema::empty()))),
            Payload::Files(files) => {
                let codec = self.codec.ok_or_else(|| {
                    ConnectorError::transform("received file payload but the source declares no file codec")
                })?;
                decode_files(codec, &files)
            }
        }
    }

    fn append_lineage(
        &self,
        table: RecordBatch,
        metadata: Option<&BlockMetadata>,
    ) -> Result<RecordBatch, ConnectorError> {
        if self.include.is_empty() && self.tag.is_none() {
            return Ok(table);
        }
        let rows = table.num_rows();
        let schema = table.schema();
        let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
        let mut columns: Vec<ArrayRef> = table.columns().to_vec();

        let mut push = |name: String, values: ArrayRef| -> Result<(), ConnectorError> {
            if fields.iter().any(|f| f.name() == &name) {
                return Err(ConnectorError::transform(format!(
                    "lineage column '{name}' already exists in the table"
                )));
            }
            fields.push(Arc::new(Field::new(name, DataType::Utf8, true)));
            columns.push(values);
            Ok(())
        };

        for field in &self.include {
            let values = lineage_values(*field, metadata, rows)?;
            push(field.column_name(&self.prefix), values)?;
        }
        if let Some(tag) = &self.tag {
            push(tag_column_name(&self.prefix), broadcast(Some(tag), rows))?;
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .map_err(|e| ConnectorError::transform(format!("cannot append lineage columns: {e}")))
    }
}

/// Decode every file and concatenate; all files must share one schema.
fn decode_files(codec: FileCodec, files: &[Bytes]) -> Result<RecordBatch, ConnectorError> {
    let tables = files
        .iter()
        .map(|f| codec.decode(f))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(first) = tables.first() else {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    };
    concat_batches(&first.schema(), &tables)
        .map_err(|e| ConnectorError::transform(format!("files in one block differ in schema: {e}")))
}

fn broadcast(value: Option<&str>, rows: usize) -> ArrayRef {
    Arc::new(StringArray::from(vec![value; rows]))
}

fn lineage_values(
    field: PrivateField,
    metadata: Option<&BlockMetadata>,
    rows: usize,
) -> Result<ArrayRef, ConnectorError> {
    let Some(meta) = metadata else {
        return Ok(broadcast(None, rows));
    };
    let single = match field {
        PrivateField::ExtNameValue => meta.ext_name_value.as_deref(),
        PrivateField::PipelineNameValue => meta.pipeline_name_value.as_deref(),
        PrivateField::Path => meta.path.as_deref(),
        PrivateField::Prefix => meta.prefix.as_deref(),
        PrivateField::IncrementalValue => match &meta.incremental_value {
            Some(IncrementalValue::Single(v)) => Some(v.as_str()),
            Some(IncrementalValue::PerRow(values)) => {
                if values.len() != rows {
                    return Err(ConnectorError::transform(format!(
                        "block carries {} incremental values for {rows} rows",
                        values.len()
                    )));
                }
                return Ok(Arc::new(StringArray::from(values.clone())));
            }
            None => None,
        },
    };
    Ok(broadcast(single, rows))
}

async fn run_sql(sql: &str, table: RecordBatch) -> Result<RecordBatch, ConnectorError> {
    let failed = |e: datafusion::error::DataFusionError| {
        ConnectorError::transform(format!("transformSql failed: {e}"))
    };
    let ctx = SessionContext::new();
    ctx.register_batch(SQL_TABLE_NAME, table).map_err(failed)?;
    let df = ctx.sql(sql).await.map_err(failed)?;
    let schema = Arc::new(df.schema().as_arrow().clone());
    let batches = df.collect().await.map_err(failed)?;
    concat_batches(&schema, &batches)
        .map_err(|e| ConnectorError::transform(format!("cannot combine query results: {e}")))
}
