//! Loaders: write blocks to a destination.
//!
//! `push` is called once per block, in order, terminal block included.
//! Writing the same block twice overwrites the same destination objects.

pub mod dataset_repo;
pub mod object_storage;
pub mod relational;

use std::path::Path as FsPath;

use async_trait::async_trait;
use blockline_types::{ConnectorError, DataBlock, FileFormat, Payload};
use bytes::Bytes;

use crate::codec::encode_table;
use crate::extract::object_storage::join_key;

pub use dataset_repo::DatasetRepoLoader;
pub use object_storage::ObjectStorageLoader;
pub use relational::RelationalTableLoader;

#[async_trait]
pub trait Loader: Send {
    /// Type tag of the configuration this loader was built from.
    fn type_tag(&self) -> &'static str;

    /// Whether raw file payloads can be written unchanged.
    fn is_compatible_with_copy_file(&self) -> bool;

    async fn push(&mut self, block: &DataBlock) -> Result<(), ConnectorError>;
}

/// Turns blocks into named objects under a destination folder.
///
/// File payloads keep their bytes. Table payloads are serialised in
/// `file_type`. Objects are named after the block's lineage path, or
/// `part-NNNNNN.<ext>` when the block has none.
#[derive(Debug)]
pub(crate) struct ObjectNamer {
    folder: String,
    file_type: FileFormat,
    seq: u64,
}

impl ObjectNamer {
    pub(crate) fn new(folder: String, file_type: FileFormat) -> Self {
        Self {
            folder,
            file_type,
            seq: 0,
        }
    }

    pub(crate) fn folder(&self) -> &str {
        &self.folder
    }

    /// Objects to write for `block`; empty for blocks without data.
    pub(crate) fn objects(&mut self, block: &DataBlock) -> Result<Vec<(String, Bytes)>, ConnectorError> {
        match &block.data {
            Payload::Files(files) => {
                let single_path = match files.as_slice() {
                    [_] => block.path(),
                    _ => None,
                };
                Ok(files
                    .iter()
                    .map(|data| {
                        let name = match single_path {
                            Some(path) => path.to_string(),
                            None => self.next_part_name(None),
                        };
                        (join_key(&self.folder, &name), data.clone())
                    })
                    .collect())
            }
            Payload::Table(batch) if batch.num_rows() == 0 => Ok(Vec::new()),
            Payload::Table(batch) => {
                let encoded = encode_table(self.file_type, batch)?;
                let name = match block.path() {
                    Some(path) => with_extension(path, self.file_type.extension()),
                    None => self.next_part_name(Some(self.file_type.extension())),
                };
                Ok(vec![(join_key(&self.folder, &name), Bytes::from(encoded))])
            }
        }
    }

    fn next_part_name(&mut self, ext: Option<&str>) -> String {
        let seq = self.seq;
        self.seq += 1;
        match ext {
            Some(ext) => format!("part-{seq:06}.{ext}"),
            None => format!("part-{seq:06}"),
        }
    }
}

/// Replace the final extension of a key, keeping its directories.
fn with_extension(key: &str, ext: &str) -> String {
    FsPath::new(key)
        .with_extension(ext)
        .to_string_lossy()
        .into_owned()
}
