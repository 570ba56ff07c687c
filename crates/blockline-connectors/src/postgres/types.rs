//! `PostgreSQL` to Arrow type mapping.
//!
//! Every downstream step (projection, row encoding, watermark binding) works
//! from [`Column`], built once per extractor from the catalog.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::sync::Arc;

/// Resolved type information for a `PostgreSQL` column type.
pub(crate) struct TypeInfo {
    pub(crate) arrow_type: DataType,
    /// Whether the projection should read this column as `col::text`.
    pub(crate) needs_cast: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Column {
    pub(crate) name: String,
    /// Declared type as printed by `format_type`, modifiers included.
    pub(crate) pg_type: String,
    pub(crate) arrow_type: DataType,
    pub(crate) nullable: bool,
    pub(crate) needs_cast: bool,
}

impl Column {
    pub(crate) fn new(name: &str, pg_type: &str, nullable: bool) -> Self {
        let info = resolve(&base_type_name(pg_type));
        Self {
            name: name.to_string(),
            pg_type: pg_type.to_string(),
            arrow_type: info.arrow_type,
            nullable,
            needs_cast: info.needs_cast,
        }
    }

    pub(crate) fn is_json(&self) -> bool {
        matches!(base_type_name(&self.pg_type).as_str(), "json" | "jsonb")
    }
}

pub(crate) fn arrow_schema(columns: &[Column]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, c.arrow_type.clone(), c.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Strip type modifiers: `numeric(10,2)` -> `numeric`,
/// `timestamp(3) without time zone` -> `timestamp without time zone`.
pub(crate) fn base_type_name(pg_type: &str) -> String {
    let mut out = String::with_capacity(pg_type.len());
    let mut depth = 0usize;
    for ch in pg_type.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn resolve(pg_type: &str) -> TypeInfo {
    let native = |arrow_type| TypeInfo {
        arrow_type,
        needs_cast: false,
    };
    match pg_type {
        "smallint" | "int2" | "smallserial" => native(DataType::Int16),
        "integer" | "int4" | "serial" => native(DataType::Int32),
        "bigint" | "int8" | "bigserial" => native(DataType::Int64),
        "real" | "float4" => native(DataType::Float32),
        "double precision" | "float8" => native(DataType::Float64),
        "boolean" | "bool" => native(DataType::Boolean),
        "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" | "name"
        | "json" | "jsonb" => native(DataType::Utf8),
        "timestamp"
        | "timestamp without time zone"
        | "timestamp with time zone"
        | "timestamptz" => native(DataType::Timestamp(TimeUnit::Microsecond, None)),
        "date" => native(DataType::Date32),
        "bytea" => native(DataType::Binary),
        // uuid, numeric, intervals, network and geometric types, arrays and
        // anything user-defined have no native decoder here.
        _ => TypeInfo {
            arrow_type: DataType::Utf8,
            needs_cast: true,
        },
    }
}
