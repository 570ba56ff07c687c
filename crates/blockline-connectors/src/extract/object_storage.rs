//! Object storage extractor: one block per listed object that matches the
//! glob filter, paged `maxKeys` keys at a time.

use std::collections::BinaryHeap;
use std::sync::Arc;

use async_trait::async_trait;
use blockline_types::block::{BlockMetadata, IncrementalValue};
use blockline_types::ext::ObjectStorageExtConfig;
use blockline_types::{ConnectorError, DataBlock, InitMetadata, Payload};
use bytes::Bytes;
use futures::TryStreamExt;
use glob::{MatchOptions, Pattern};
use object_store::path::Path;
use object_store::ObjectStore;

use super::{already_exhausted, Extractor};
use crate::codec::FileCodec;
use crate::pool::{ObjectStoragePool, Session};
use crate::template::{render_opt, RenderContext};

const TYPE_TAG: &str = "objectStorage";

pub struct ObjectStorageExtractor {
    session: Session<ObjectStoragePool>,
    prefix: String,
    filter: Option<Pattern>,
    match_options: MatchOptions,
    remove_prefix: Option<String>,
    max_keys: usize,
    ordered_listing: bool,
    cursor: Option<String>,
    exhausted: bool,
}

impl ObjectStorageExtractor {
    /// Parse and check an `objectStorage` extractor body.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` on schema or semantic problems.
    pub fn validate_config(raw: &serde_json::Value) -> Result<ObjectStorageExtConfig, ConnectorError> {
        let config: ObjectStorageExtConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::config(format!("objectStorage extractor: {e}")))?;
        config.conn_config.as_object_storage("objectStorage extractor")?;
        if config.bucket_name.trim().is_empty() {
            return Err(ConnectorError::config("objectStorage extractor: bucketName must not be empty"));
        }
        if config.max_keys == 0 {
            return Err(ConnectorError::config("objectStorage extractor: maxKeys must be >= 1"));
        }
        // Templates and the glob must be well formed regardless of run time.
        Resolved::new(&config, &RenderContext::default())?;
        Ok(config)
    }

    /// Build an extractor that connects lazily on its first call.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if templates or the glob filter are invalid.
    pub fn new(config: &ObjectStorageExtConfig, ctx: &RenderContext) -> Result<Self, ConnectorError> {
        let conn = config.conn_config.as_object_storage("objectStorage extractor")?;
        let pool = Arc::new(ObjectStoragePool::new(conn, &config.bucket_name));
        Self::with_pool(config, pool, ctx)
    }

    /// # Errors
    ///
    /// See [`ObjectStorageExtractor::new`].
    pub fn with_pool(
        config: &ObjectStorageExtConfig,
        pool: Arc<ObjectStoragePool>,
        ctx: &RenderContext,
    ) -> Result<Self, ConnectorError> {
        let resolved = Resolved::new(config, ctx)?;
        let ordered_listing = pool.lists_in_order();
        Ok(Self {
            session: Session::new(pool),
            prefix: resolved.prefix,
            filter: resolved.filter,
            match_options: MatchOptions {
                case_sensitive: true,
                require_literal_separator: !config.recursive,
                require_literal_leading_dot: false,
            },
            remove_prefix: resolved.remove_prefix,
            max_keys: config.max_keys,
            ordered_listing,
            cursor: config.start_after.clone(),
            exhausted: false,
        })
    }

    /// Codec for reading this extractor's files back as tables.
    #[must_use]
    pub fn file_codec(config: &ObjectStorageExtConfig) -> FileCodec {
        FileCodec::new(config.file_type, config.compress_type)
    }

    fn matches(&self, key: &str) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |p| p.matches_with(key, self.match_options))
    }

    fn lineage_path(&self, key: &str) -> String {
        match &self.remove_prefix {
            Some(strip) => {
                let strip = format!("{}/", strip.trim_end_matches('/'));
                key.strip_prefix(strip.as_str()).unwrap_or(key).to_string()
            }
            None => key.to_string(),
        }
    }
}

/// Rendered templates for one run.
struct Resolved {
    prefix: String,
    filter: Option<Pattern>,
    remove_prefix: Option<String>,
}

impl Resolved {
    fn new(config: &ObjectStorageExtConfig, ctx: &RenderContext) -> Result<Self, ConnectorError> {
        let prefix = ctx.render(&config.prefix)?;
        let filter = render_opt(ctx, config.path_glob_filter.as_deref())?
            .map(|glob| {
                let full = join_key(&prefix, &glob);
                Pattern::new(&full).map_err(|e| {
                    ConnectorError::config(format!("invalid pathGlobFilter '{full}': {e}"))
                })
            })
            .transpose()?;
        let remove_prefix = render_opt(ctx, config.remove_prefix_path.as_deref())?;
        Ok(Self {
            prefix,
            filter,
            remove_prefix,
        })
    }
}

/// Join key segments with exactly one `/`, like a POSIX path join.
pub(crate) fn join_key(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() || rest.starts_with('/') {
        rest.to_string()
    } else if prefix.ends_with('/') {
        format!("{prefix}{rest}")
    } else {
        format!("{prefix}/{rest}")
    }
}

/// Directory to list under so that `prefix` behaves as a plain string prefix.
fn listing_root(prefix: &str) -> Option<Path> {
    prefix
        .rfind('/')
        .map(|idx| &prefix[..idx])
        .filter(|dir| !dir.is_empty())
        .map(Path::from)
}

/// Up to `max_keys` keys starting with `prefix` and sorting after `cursor`,
/// in key order. At most `max_keys` keys are held at once; an `ordered`
/// listing is abandoned as soon as the page is full.
async fn list_page(
    store: &dyn ObjectStore,
    prefix: &str,
    cursor: Option<&str>,
    max_keys: usize,
    ordered: bool,
) -> Result<Vec<String>, ConnectorError> {
    let root = listing_root(prefix);
    let mut listing = match cursor {
        Some(after) => store.list_with_offset(root.as_ref(), &Path::from(after)),
        None => store.list(root.as_ref()),
    };

    // Max-heap: the largest key is evicted once the page overflows.
    let mut page = BinaryHeap::with_capacity(max_keys + 1);
    while let Some(meta) = listing
        .try_next()
        .await
        .map_err(|e| ConnectorError::extract(format!("listing '{prefix}' failed: {e}")))?
    {
        let key = meta.location.to_string();
        if !key.starts_with(prefix) || cursor.is_some_and(|after| key.as_str() <= after) {
            continue;
        }
        page.push(key);
        if page.len() > max_keys {
            page.pop();
        }
        if ordered && page.len() == max_keys {
            break;
        }
    }
    Ok(page.into_sorted_vec())
}

async fn download(store: &dyn ObjectStore, key: &str) -> Result<Bytes, ConnectorError> {
    let failed = |e: object_store::Error| ConnectorError::extract(format!("download of '{key}' failed: {e}"));
    store
        .get(&Path::from(key))
        .await
        .map_err(failed)?
        .bytes()
        .await
        .map_err(failed)
}

#[async_trait]
impl Extractor for ObjectStorageExtractor {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        true
    }

    async fn extract(&mut self, init: &InitMetadata) -> Result<Vec<DataBlock>, ConnectorError> {
        if self.exhausted {
            return Err(already_exhausted(TYPE_TAG));
        }

        let prefix = self.prefix.clone();
        let cursor = self.cursor.clone();
        let max_keys = self.max_keys;
        let ordered = self.ordered_listing;
        let keys = self
            .session
            .scope(|store| async move {
                list_page(&**store, &prefix, cursor.as_deref(), max_keys, ordered).await
            })
            .await?;
        tracing::info!(prefix = %self.prefix, listed = keys.len(), "listed objects");

        let exhausted = keys.len() < self.max_keys;
        if let Some(last) = keys.last() {
            self.cursor = Some(last.clone());
        }

        let wanted: Vec<String> = keys.into_iter().filter(|k| self.matches(k)).collect();
        let files = self
            .session
            .scope(|store| async move {
                let mut files = Vec::with_capacity(wanted.len());
                for key in wanted {
                    tracing::debug!(key = %key, "downloading object");
                    let data = download(&**store, &key).await?;
                    files.push((key, data));
                }
                Ok(files)
            })
            .await?;

        let mut blocks: Vec<DataBlock> = files
            .into_iter()
            .map(|(key, data)| {
                let path = self.lineage_path(&key);
                let metadata = BlockMetadata {
                    path: Some(path.clone()),
                    prefix: Some(self.prefix.clone()),
                    incremental_value: Some(IncrementalValue::Single(path)),
                    ..BlockMetadata::from_init(init)
                };
                DataBlock::new(Payload::Files(vec![data]), Some(metadata))
            })
            .collect();

        if exhausted {
            self.exhausted = true;
            blocks.push(DataBlock::terminal_files());
        }
        Ok(blocks)
    }
}
