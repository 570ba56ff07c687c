//! Request-scoped object storage pool.
//!
//! The store client is built on first checkout and shared afterwards; each
//! acquire hands out a cheap clone and release just drops it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use blockline_types::conn::{ObjectStorageConnConfig, StorageProvider};
use blockline_types::ConnectorError;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;

use super::ConnectionPool;

pub struct ObjectStoragePool {
    config: ObjectStorageConnConfig,
    bucket: String,
    store: Mutex<Option<Arc<dyn ObjectStore>>>,
}

impl ObjectStoragePool {
    /// Pool for `bucket`; nothing is contacted until the first acquire.
    #[must_use]
    pub fn new(config: &ObjectStorageConnConfig, bucket: &str) -> Self {
        Self {
            config: config.clone(),
            bucket: bucket.to_string(),
            store: Mutex::new(None),
        }
    }

    /// Pool over an already-built store, which must list keys in
    /// lexicographic order.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            config: ObjectStorageConnConfig::default(),
            bucket: bucket.to_string(),
            store: Mutex::new(Some(store)),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Whether listings come back in key order. A local directory tree is
    /// walked in filesystem order.
    #[must_use]
    pub fn lists_in_order(&self) -> bool {
        self.config.provider != StorageProvider::Local
    }

    fn build(&self) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
        match self.config.provider {
            StorageProvider::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&self.bucket);
                if let Some(region) = &self.config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &self.config.endpoint {
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let Some(key) = &self.config.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &self.config.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                let store = builder.build().map_err(|e| {
                    ConnectorError::connection(format!(
                        "failed to build s3 client for bucket '{}': {e}",
                        self.bucket
                    ))
                })?;
                Ok(Arc::new(store))
            }
            StorageProvider::Local => {
                let root = self.config.root.as_deref().ok_or_else(|| {
                    ConnectorError::config("local object storage requires 'root'")
                })?;
                let dir = PathBuf::from(root).join(&self.bucket);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    ConnectorError::connection(format!("cannot create {}: {e}", dir.display()))
                })?;
                let store = LocalFileSystem::new_with_prefix(&dir).map_err(|e| {
                    ConnectorError::connection(format!("cannot open {}: {e}", dir.display()))
                })?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[async_trait]
impl ConnectionPool for ObjectStoragePool {
    type Handle = Arc<dyn ObjectStore>;

    async fn acquire(&self) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
        let mut slot = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = self.build()?;
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    fn release(&self, _handle: Arc<dyn ObjectStore>) {}
}
