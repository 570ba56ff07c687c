//! Dataset repository loader: each block becomes one hub commit.

use async_trait::async_trait;
use blockline_types::loader::DatasetRepoLoaderConfig;
use blockline_types::{ConnectorError, DataBlock};

use super::{Loader, ObjectNamer};
use crate::pool::{DatasetRepoPool, RepoRef, Session};
use crate::template::RenderContext;

const TYPE_TAG: &str = "datasetRepo";

pub struct DatasetRepoLoader {
    config: DatasetRepoLoaderConfig,
    session: Session<DatasetRepoPool>,
    namer: ObjectNamer,
}

impl DatasetRepoLoader {
    /// Parse and check a `datasetRepo` loader body.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` on schema or semantic problems.
    pub fn validate_config(raw: &serde_json::Value) -> Result<DatasetRepoLoaderConfig, ConnectorError> {
        let config: DatasetRepoLoaderConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::config(format!("datasetRepo loader: {e}")))?;
        let conn = config.conn_config.as_dataset_repo("datasetRepo loader")?;
        if conn.access_token.trim().is_empty() {
            return Err(ConnectorError::config("datasetRepo loader: accessToken must not be empty"));
        }
        let valid_id = config
            .repo_id
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
        if !valid_id {
            return Err(ConnectorError::config(format!(
                "datasetRepo loader: repoId '{}' must look like 'owner/name'",
                config.repo_id
            )));
        }
        if !matches!(config.repo_type.as_str(), "dataset" | "model" | "space") {
            return Err(ConnectorError::config(format!(
                "datasetRepo loader: unknown repoType '{}'",
                config.repo_type
            )));
        }
        RenderContext::default().render(&config.folder)?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigValidation` if the folder template or connection is invalid.
    pub fn new(config: &DatasetRepoLoaderConfig, ctx: &RenderContext) -> Result<Self, ConnectorError> {
        let conn = config.conn_config.as_dataset_repo("datasetRepo loader")?;
        let folder = ctx.render(&config.folder)?;
        Ok(Self {
            config: config.clone(),
            session: Session::new(DatasetRepoPool::new(conn)),
            namer: ObjectNamer::new(folder, config.file_type),
        })
    }

    fn summary(&self, files: usize) -> String {
        self.config.commit_message.clone().unwrap_or_else(|| {
            let folder = match self.namer.folder() {
                "" => "/",
                other => other,
            };
            format!("Upload {files} file(s) to {folder}")
        })
    }
}

#[async_trait]
impl Loader for DatasetRepoLoader {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        true
    }

    async fn push(&mut self, block: &DataBlock) -> Result<(), ConnectorError> {
        let files = self.namer.objects(block)?;
        if files.is_empty() {
            return Ok(());
        }
        let summary = self.summary(files.len());
        let repo = RepoRef {
            repo_id: &self.config.repo_id,
            repo_type: &self.config.repo_type,
            revision: &self.config.revision,
        };
        self.session
            .scope(|hub| async move { hub.commit(&repo, &summary, &files).await })
            .await?;
        tracing::debug!(repo = %self.config.repo_id, "committed block to hub");
        Ok(())
    }
}
