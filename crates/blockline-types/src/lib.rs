//! Shared blockline data and configuration types.
//!
//! Everything here is plain data: no I/O, no runtime. The connectors and
//! engine crates build on these types so that a pipeline description can be
//! parsed, validated and inspected without touching any external system.

pub mod block;
pub mod conn;
pub mod error;
pub mod ext;
pub mod format;
pub mod loader;
pub mod pipeline;

pub use block::{BlockMetadata, DataBlock, IncrementalValue, InitMetadata, Payload, PayloadKind};
pub use conn::ConnConfig;
pub use error::ConnectorError;
pub use ext::ExtConfig;
pub use format::{Compression, FileFormat};
pub use loader::LoaderConfig;
pub use pipeline::{PipelineConfig, PrivateField, ResourceConfig, TransferMode};
