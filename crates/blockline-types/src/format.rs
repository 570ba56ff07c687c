//! File formats and compression codecs understood by file-based connectors.

use serde::{Deserialize, Serialize};

/// Serialisation format of a file payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Parquet,
    /// Newline-delimited JSON objects.
    Json,
    /// Comma-separated values with a header row.
    Csv,
}

impl FileFormat {
    /// File extension used when a loader has to name an object itself.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Json => "jsonl",
            Self::Csv => "csv",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parquet => f.write_str("parquet"),
            Self::Json => f.write_str("json"),
            Self::Csv => f.write_str("csv"),
        }
    }
}

/// Whole-file compression applied on top of [`FileFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[serde(alias = "bz2")]
    Bzip2,
    #[serde(alias = "zst")]
    Zstd,
    Lz4,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bzip2 => f.write_str("bzip2"),
            Self::Zstd => f.write_str("zstd"),
            Self::Lz4 => f.write_str("lz4"),
        }
    }
}
