//! Connection pools, extractors, loaders and file codecs for blockline.
//!
//! Every connector is reached through [`registry`], which maps a
//! configuration `type` tag to its implementation. Extractors and loaders
//! are built without touching the network; pools connect on first use.

pub mod codec;
pub mod extract;
pub mod load;
pub mod pool;
mod postgres;
pub mod registry;
pub mod template;

pub use codec::FileCodec;
pub use extract::Extractor;
pub use load::Loader;
pub use pool::{ConnectionPool, Session};
pub use template::RenderContext;
