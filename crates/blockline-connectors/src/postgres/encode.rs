//! Row-to-Arrow encoding for query results.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, StringBuilder, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use blockline_types::ConnectorError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::Row;

use super::types::Column;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// Encode the first `columns.len()` fields of every row into one batch.
pub(crate) fn rows_to_record_batch(
    rows: &[Row],
    columns: &[Column],
    schema: &SchemaRef,
) -> Result<RecordBatch, ConnectorError> {
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| encode_column(rows, idx, col))
        .collect();

    RecordBatch::try_new(Arc::clone(schema), arrays)
        .map_err(|e| ConnectorError::extract(format!("failed to build record batch: {e}")))
}

fn encode_column(rows: &[Row], idx: usize, col: &Column) -> ArrayRef {
    match &col.arrow_type {
        DataType::Int16 => Arc::new(
            rows.iter()
                .map(|row| row.try_get::<_, Option<i16>>(idx).ok().flatten())
                .collect::<Int16Array>(),
        ),
        DataType::Int32 => Arc::new(
            rows.iter()
                .map(|row| row.try_get::<_, Option<i32>>(idx).ok().flatten())
                .collect::<Int32Array>(),
        ),
        DataType::Int64 => Arc::new(
            rows.iter()
                .map(|row| row.try_get::<_, Option<i64>>(idx).ok().flatten())
                .collect::<Int64Array>(),
        ),
        DataType::Float32 => Arc::new(
            rows.iter()
                .map(|row| row.try_get::<_, Option<f32>>(idx).ok().flatten())
                .collect::<Float32Array>(),
        ),
        DataType::Float64 => Arc::new(
            rows.iter()
                .map(|row| row.try_get::<_, Option<f64>>(idx).ok().flatten())
                .collect::<Float64Array>(),
        ),
        DataType::Boolean => Arc::new(
            rows.iter()
                .map(|row| row.try_get::<_, Option<bool>>(idx).ok().flatten())
                .collect::<BooleanArray>(),
        ),
        DataType::Timestamp(TimeUnit::Microsecond, _) => Arc::new(
            rows.iter()
                .map(|row| {
                    // timestamp and timestamptz decode through different FromSql impls.
                    row.try_get::<_, Option<NaiveDateTime>>(idx)
                        .ok()
                        .flatten()
                        .map(|dt| dt.and_utc().timestamp_micros())
                        .or_else(|| {
                            row.try_get::<_, Option<DateTime<Utc>>>(idx)
                                .ok()
                                .flatten()
                                .map(|dt| dt.timestamp_micros())
                        })
                })
                .collect::<TimestampMicrosecondArray>(),
        ),
        DataType::Date32 => Arc::new(
            rows.iter()
                .map(|row| {
                    row.try_get::<_, Option<NaiveDate>>(idx)
                        .ok()
                        .flatten()
                        .map(days_since_epoch)
                })
                .collect::<Date32Array>(),
        ),
        DataType::Binary => {
            let mut builder = BinaryBuilder::with_capacity(rows.len(), rows.len() * 64);
            for row in rows {
                match row.try_get::<_, Option<Vec<u8>>>(idx).ok().flatten() {
                    Some(bytes) => builder.append_value(&bytes),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 32);
            let json = col.is_json();
            for row in rows {
                let value = if json {
                    row.try_get::<_, Option<serde_json::Value>>(idx)
                        .ok()
                        .flatten()
                        .map(|v| v.to_string())
                } else {
                    row.try_get::<_, Option<String>>(idx).ok().flatten()
                };
                match value {
                    Some(s) => builder.append_value(&s),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

/// Text values of one result column, used for the private incremental field.
pub(crate) fn text_column(rows: &[Row], idx: usize) -> Vec<Option<String>> {
    rows.iter()
        .map(|row| row.try_get::<_, Option<String>>(idx).ok().flatten())
        .collect()
}

pub(crate) fn days_since_epoch(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.num_days_from_ce() - UNIX_EPOCH_FROM_CE
}
