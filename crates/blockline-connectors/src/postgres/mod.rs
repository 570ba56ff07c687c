//! `PostgreSQL` helpers shared by the relational extractor and loader.

pub(crate) mod catalog;
pub(crate) mod encode;
pub(crate) mod identifier;
pub(crate) mod typed_col;
pub(crate) mod types;
