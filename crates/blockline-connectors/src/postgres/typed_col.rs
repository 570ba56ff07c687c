//! Typed Arrow column access for the INSERT write path.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    TimeUnit, TimestampMicrosecondType,
};
use arrow::record_batch::RecordBatch;
use blockline_types::ConnectorError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio_postgres::types::ToSql;

/// Cast columns without a native parameter type into one that has one:
/// narrow integers widen, timestamps move to microseconds, everything else
/// becomes text.
pub(crate) fn normalize_for_insert(batch: &RecordBatch) -> Result<Vec<ArrayRef>, ConnectorError> {
    batch
        .columns()
        .iter()
        .map(|col| {
            let target = match col.data_type() {
                DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Boolean
                | DataType::Utf8
                | DataType::Date32
                | DataType::Binary
                | DataType::Timestamp(TimeUnit::Microsecond, _) => return Ok(Arc::clone(col)),
                DataType::Int8 | DataType::UInt8 => DataType::Int16,
                DataType::UInt16 => DataType::Int32,
                DataType::UInt32 | DataType::UInt64 => DataType::Int64,
                DataType::Float16 => DataType::Float32,
                DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
                DataType::LargeBinary | DataType::BinaryView => DataType::Binary,
                _ => DataType::Utf8,
            };
            cast(col, &target).map_err(|e| {
                ConnectorError::load(format!(
                    "cannot convert {} column to {target}: {e}",
                    col.data_type()
                ))
            })
        })
        .collect()
}

/// Pre-downcast column reference; resolves the concrete array type once per
/// column per batch instead of once per cell.
pub(crate) enum TypedCol<'a> {
    Int16(&'a Int16Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    Boolean(&'a BooleanArray),
    Utf8(&'a StringArray),
    TimestampMicros(&'a TimestampMicrosecondArray),
    Date32(&'a Date32Array),
    Binary(&'a BinaryArray),
    Null,
}

/// Downcast columns already passed through [`normalize_for_insert`].
pub(crate) fn downcast_columns(columns: &[ArrayRef]) -> Vec<TypedCol<'_>> {
    columns
        .iter()
        .map(|col| match col.data_type() {
            DataType::Int16 => TypedCol::Int16(col.as_primitive::<Int16Type>()),
            DataType::Int32 => TypedCol::Int32(col.as_primitive::<Int32Type>()),
            DataType::Int64 => TypedCol::Int64(col.as_primitive::<Int64Type>()),
            DataType::Float32 => TypedCol::Float32(col.as_primitive::<Float32Type>()),
            DataType::Float64 => TypedCol::Float64(col.as_primitive::<Float64Type>()),
            DataType::Boolean => TypedCol::Boolean(col.as_boolean()),
            DataType::Utf8 => TypedCol::Utf8(col.as_string::<i32>()),
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                TypedCol::TimestampMicros(col.as_primitive::<TimestampMicrosecondType>())
            }
            DataType::Date32 => TypedCol::Date32(col.as_primitive::<Date32Type>()),
            DataType::Binary => TypedCol::Binary(col.as_binary::<i32>()),
            _ => TypedCol::Null,
        })
        .collect()
}

impl TypedCol<'_> {
    /// Parameter type the value is bound as; the server applies the
    /// assignment cast to the target column.
    pub(crate) fn param_type(&self) -> &'static str {
        match self {
            Self::Int16(_) => "int2",
            Self::Int32(_) => "int4",
            Self::Int64(_) => "int8",
            Self::Float32(_) => "float4",
            Self::Float64(_) => "float8",
            Self::Boolean(_) => "bool",
            Self::Utf8(_) | Self::Null => "text",
            Self::TimestampMicros(_) => "timestamp",
            Self::Date32(_) => "date",
            Self::Binary(_) => "bytea",
        }
    }
}

pub(crate) enum SqlParamValue<'a> {
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Boolean(Option<bool>),
    Text(Option<&'a str>),
    Timestamp(Option<NaiveDateTime>),
    Date(Option<NaiveDate>),
    Bytes(Option<&'a [u8]>),
}

impl SqlParamValue<'_> {
    pub(crate) fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int16(v) => v,
            Self::Int32(v) => v,
            Self::Int64(v) => v,
            Self::Float32(v) => v,
            Self::Float64(v) => v,
            Self::Boolean(v) => v,
            Self::Text(v) => v,
            Self::Timestamp(v) => v,
            Self::Date(v) => v,
            Self::Bytes(v) => v,
        }
    }
}

fn cell<'a, A: Array, T>(arr: &'a A, row: usize, value: impl FnOnce(&'a A) -> T) -> Option<T> {
    if arr.is_null(row) {
        None
    } else {
        Some(value(arr))
    }
}

pub(crate) fn sql_param_value<'a>(col: &TypedCol<'a>, row: usize) -> SqlParamValue<'a> {
    match *col {
        TypedCol::Null => SqlParamValue::Text(None),
        TypedCol::Int16(arr) => SqlParamValue::Int16(cell(arr, row, |a| a.value(row))),
        TypedCol::Int32(arr) => SqlParamValue::Int32(cell(arr, row, |a| a.value(row))),
        TypedCol::Int64(arr) => SqlParamValue::Int64(cell(arr, row, |a| a.value(row))),
        TypedCol::Float32(arr) => SqlParamValue::Float32(cell(arr, row, |a| a.value(row))),
        TypedCol::Float64(arr) => SqlParamValue::Float64(cell(arr, row, |a| a.value(row))),
        TypedCol::Boolean(arr) => SqlParamValue::Boolean(cell(arr, row, |a| a.value(row))),
        TypedCol::Utf8(arr) => SqlParamValue::Text(cell(arr, row, |a| a.value(row))),
        TypedCol::TimestampMicros(arr) => SqlParamValue::Timestamp(
            cell(arr, row, |a| a.value(row)).and_then(|micros| {
                let secs = micros.div_euclid(1_000_000);
                let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).unwrap_or(0);
                DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
            }),
        ),
        TypedCol::Date32(arr) => SqlParamValue::Date(
            cell(arr, row, |a| a.value(row)).and_then(date_from_epoch_days),
        ),
        TypedCol::Binary(arr) => SqlParamValue::Bytes(cell(arr, row, |a| a.value(row))),
    }
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    epoch.checked_add_signed(chrono::Duration::days(i64::from(days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int8Array, LargeStringArray, UInt64Array};
    use arrow::datatypes::{Field, Schema};

    #[test]
    fn sql_param_value_handles_numeric_and_nulls() {
        let arr = Int32Array::from(vec![Some(7), None]);
        let col = TypedCol::Int32(&arr);
        assert!(matches!(sql_param_value(&col, 0), SqlParamValue::Int32(Some(7))));
        assert!(matches!(sql_param_value(&col, 1), SqlParamValue::Int32(None)));
    }

    #[test]
    fn sql_param_value_handles_utf8() {
        let arr = StringArray::from(vec![Some("alice"), None]);
        let col = TypedCol::Utf8(&arr);
        match sql_param_value(&col, 0) {
            SqlParamValue::Text(Some(v)) => assert_eq!(v, "alice"),
            _ => panic!("expected Text(Some('alice'))"),
        }
        assert!(matches!(sql_param_value(&col, 1), SqlParamValue::Text(None)));
    }

    #[test]
    fn timestamp_micros_convert_to_naive() {
        let arr = TimestampMicrosecondArray::from(vec![Some(1_500_000), Some(-1)]);
        let col = TypedCol::TimestampMicros(&arr);
        match sql_param_value(&col, 0) {
            SqlParamValue::Timestamp(Some(ts)) => {
                assert_eq!(ts.and_utc().timestamp_micros(), 1_500_000);
            }
            _ => panic!("expected timestamp"),
        }
        match sql_param_value(&col, 1) {
            SqlParamValue::Timestamp(Some(ts)) => assert_eq!(ts.and_utc().timestamp_micros(), -1),
            _ => panic!("expected pre-epoch timestamp"),
        }
    }

    #[test]
    fn date32_converts_from_epoch_days() {
        let arr = Date32Array::from(vec![Some(0), Some(31)]);
        let col = TypedCol::Date32(&arr);
        match sql_param_value(&col, 1) {
            SqlParamValue::Date(Some(d)) => assert_eq!(d, NaiveDate::from_ymd_opt(1970, 2, 1).unwrap()),
            _ => panic!("expected date"),
        }
    }

    #[test]
    fn normalize_widens_and_stringifies() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("tiny", DataType::Int8, true),
            Field::new("big", DataType::UInt64, true),
            Field::new("note", DataType::LargeUtf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int8Array::from(vec![1i8])),
                Arc::new(UInt64Array::from(vec![5u64])),
                Arc::new(LargeStringArray::from(vec!["n"])),
            ],
        )
        .unwrap();
        let cols = normalize_for_insert(&batch).unwrap();
        assert_eq!(cols[0].data_type(), &DataType::Int16);
        assert_eq!(cols[1].data_type(), &DataType::Int64);
        assert_eq!(cols[2].data_type(), &DataType::Utf8);
        let typed = downcast_columns(&cols);
        assert!(matches!(sql_param_value(&typed[1], 0), SqlParamValue::Int64(Some(5))));
    }
}
