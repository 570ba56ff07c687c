//! Object storage loader: one object per block item under the rendered folder.

use std::sync::Arc;

use async_trait::async_trait;
use blockline_types::loader::ObjectStorageLoaderConfig;
use blockline_types::{ConnectorError, DataBlock};
use object_store::path::Path;

use super::{Loader, ObjectNamer};
use crate::pool::{ObjectStoragePool, Session};
use crate::template::RenderContext;

const TYPE_TAG: &str = "objectStorage";

pub struct ObjectStorageLoader {
    session: Session<ObjectStoragePool>,
    namer: ObjectNamer,
}

impl ObjectStorageLoader {
    /// Parse and check an `objectStorage` loader body.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` on schema or semantic problems.
    pub fn validate_config(raw: &serde_json::Value) -> Result<ObjectStorageLoaderConfig, ConnectorError> {
        let config: ObjectStorageLoaderConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::config(format!("objectStorage loader: {e}")))?;
        config.conn_config.as_object_storage("objectStorage loader")?;
        if config.bucket_name.trim().is_empty() {
            return Err(ConnectorError::config("objectStorage loader: bucketName must not be empty"));
        }
        RenderContext::default().render(&config.folder)?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigValidation` if the folder template is invalid.
    pub fn new(config: &ObjectStorageLoaderConfig, ctx: &RenderContext) -> Result<Self, ConnectorError> {
        let conn = config.conn_config.as_object_storage("objectStorage loader")?;
        let pool = Arc::new(ObjectStoragePool::new(conn, &config.bucket_name));
        Self::with_pool(config, pool, ctx)
    }

    /// # Errors
    ///
    /// See [`ObjectStorageLoader::new`].
    pub fn with_pool(
        config: &ObjectStorageLoaderConfig,
        pool: Arc<ObjectStoragePool>,
        ctx: &RenderContext,
    ) -> Result<Self, ConnectorError> {
        let folder = ctx.render(&config.folder)?;
        Ok(Self {
            session: Session::new(pool),
            namer: ObjectNamer::new(folder, config.file_type),
        })
    }
}

#[async_trait]
impl Loader for ObjectStorageLoader {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        true
    }

    async fn push(&mut self, block: &DataBlock) -> Result<(), ConnectorError> {
        let objects = self.namer.objects(block)?;
        if objects.is_empty() {
            return Ok(());
        }
        let bucket = self.session.pool().bucket().to_string();
        self.session
            .scope(|store| async move {
                for (key, data) in objects {
                    let size = data.len();
                    store
                        .put(&Path::from(key.as_str()), data.into())
                        .await
                        .map_err(|e| ConnectorError::load(format!("upload of '{key}' failed: {e}")))?;
                    tracing::debug!(bucket = %bucket, key = %key, bytes = size, "uploaded object");
                }
                Ok(())
            })
            .await
    }
}
