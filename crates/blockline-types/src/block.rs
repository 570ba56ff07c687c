//! Data blocks: the unit of hand-off between pipeline stages.
//!
//! A [`DataBlock`] carries either raw file bytes or one Arrow table, plus
//! optional lineage metadata. Exactly one block per run has `is_end` set; it
//! is the end-of-stream sentinel and may carry an empty payload.

use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Payload representation of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadKind {
    /// Ordered list of opaque file byte strings.
    Files,
    /// A single in-memory Arrow table.
    Table,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Files => f.write_str("files"),
            Self::Table => f.write_str("table"),
        }
    }
}

/// Block payload. The kind is derived from the variant, so it can never
/// disagree with the data actually carried.
#[derive(Debug, Clone)]
pub enum Payload {
    Files(Vec<Bytes>),
    Table(RecordBatch),
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Files(_) => PayloadKind::Files,
            Self::Table(_) => PayloadKind::Table,
        }
    }

    /// An empty table with no columns.
    #[must_use]
    pub fn empty_table() -> Self {
        Self::Table(RecordBatch::new_empty(Arc::new(Schema::empty())))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Files(files) => files.is_empty(),
            Self::Table(batch) => batch.num_rows() == 0,
        }
    }

    /// Row count of a table payload; file payloads report zero.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Files(_) => 0,
            Self::Table(batch) => batch.num_rows(),
        }
    }

    /// Payload size in bytes (file lengths, or the table's in-memory footprint).
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Files(files) => files.iter().map(Bytes::len).sum(),
            Self::Table(batch) => batch.get_array_memory_size(),
        }
    }
}

/// Watermark value carried as lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncrementalValue {
    /// One value for the whole block (e.g. an object key).
    Single(String),
    /// One value per table row, in row order.
    PerRow(Vec<Option<String>>),
}

/// Lineage metadata attached to a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_name_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_name_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_value: Option<IncrementalValue>,
}

impl BlockMetadata {
    /// Metadata seeded with the run-level names from [`InitMetadata`].
    #[must_use]
    pub fn from_init(init: &InitMetadata) -> Self {
        Self {
            ext_name_value: init.ext_name_value.clone(),
            pipeline_name_value: init.pipeline_name_value.clone(),
            tag_name_value: init.tag_name_value.clone(),
            ..Self::default()
        }
    }
}

/// Run-level lineage handed to the extractor at every `extract` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMetadata {
    #[serde(default)]
    pub ext_name_value: Option<String>,
    #[serde(default)]
    pub pipeline_name_value: Option<String>,
    #[serde(default)]
    pub tag_name_value: Option<String>,
}

/// Unit of hand-off between stages.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub is_end: bool,
    pub data: Payload,
    pub metadata: Option<BlockMetadata>,
}

impl DataBlock {
    #[must_use]
    pub fn new(data: Payload, metadata: Option<BlockMetadata>) -> Self {
        Self {
            is_end: false,
            data,
            metadata,
        }
    }

    /// End-of-stream sentinel carrying `data` (usually empty).
    #[must_use]
    pub fn terminal(data: Payload) -> Self {
        Self {
            is_end: true,
            data,
            metadata: None,
        }
    }

    /// Terminal block with an empty file list.
    #[must_use]
    pub fn terminal_files() -> Self {
        Self::terminal(Payload::Files(Vec::new()))
    }

    #[must_use]
    pub fn data_type(&self) -> PayloadKind {
        self.data.kind()
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};

    fn table(rows: i32) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from_iter_values(0..rows))])
            .unwrap()
    }

    #[test]
    fn data_type_follows_payload() {
        let files = DataBlock::new(Payload::Files(vec![Bytes::from_static(b"a")]), None);
        assert_eq!(files.data_type(), PayloadKind::Files);
        let tbl = DataBlock::new(Payload::Table(table(2)), None);
        assert_eq!(tbl.data_type(), PayloadKind::Table);
    }

    #[test]
    fn terminal_block_is_end_and_empty() {
        let block = DataBlock::terminal_files();
        assert!(block.is_end);
        assert!(block.data.is_empty());
        assert!(block.metadata.is_none());

        let block = DataBlock::terminal(Payload::empty_table());
        assert_eq!(block.data_type(), PayloadKind::Table);
        assert_eq!(block.data.num_rows(), 0);
    }

    #[test]
    fn payload_sizes() {
        let files = Payload::Files(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")]);
        assert_eq!(files.byte_len(), 5);
        assert_eq!(files.num_rows(), 0);
        let tbl = Payload::Table(table(3));
        assert_eq!(tbl.num_rows(), 3);
        assert!(tbl.byte_len() > 0);
    }

    #[test]
    fn metadata_from_init_copies_names_only() {
        let init = InitMetadata {
            ext_name_value: Some("s3".into()),
            pipeline_name_value: Some("nightly".into()),
            tag_name_value: None,
        };
        let meta = BlockMetadata::from_init(&init);
        assert_eq!(meta.ext_name_value.as_deref(), Some("s3"));
        assert_eq!(meta.pipeline_name_value.as_deref(), Some("nightly"));
        assert!(meta.path.is_none());
        assert!(meta.incremental_value.is_none());
    }

    #[test]
    fn incremental_value_serializes_untagged() {
        let single = serde_json::to_value(IncrementalValue::Single("k".into())).unwrap();
        assert_eq!(single, serde_json::json!("k"));
        let rows = serde_json::to_value(IncrementalValue::PerRow(vec![Some("1".into()), None]))
            .unwrap();
        assert_eq!(rows, serde_json::json!(["1", null]));
    }
}
