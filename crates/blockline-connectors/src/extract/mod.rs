//! Extractors: pull data from a source in bounded batches of blocks.
//!
//! Each `extract` call returns zero or more blocks. Across the whole run an
//! extractor emits exactly one terminal block, as the last block of the call
//! that exhausts the source; it must not be called again afterwards.

pub mod object_storage;
pub mod relational;

use async_trait::async_trait;
use blockline_types::{ConnectorError, DataBlock, InitMetadata};

pub use object_storage::ObjectStorageExtractor;
pub use relational::RelationalTableExtractor;

#[async_trait]
pub trait Extractor: Send {
    /// Type tag of the configuration this extractor was built from.
    fn type_tag(&self) -> &'static str;

    /// Whether blocks can travel as raw files in `copyFile` mode.
    fn is_compatible_with_copy_file(&self) -> bool;

    /// Produce the next batch of blocks.
    async fn extract(&mut self, init: &InitMetadata) -> Result<Vec<DataBlock>, ConnectorError>;
}

pub(crate) fn already_exhausted(tag: &str) -> ConnectorError {
    ConnectorError::extract(format!(
        "{tag} extractor called again after emitting its terminal block"
    ))
}
