//! Request-scoped client for a dataset repository hub.
//!
//! Files are uploaded through the hub's commit endpoint: one newline-delimited
//! JSON request whose first line is the commit header and whose following
//! lines each carry a base64-encoded file.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use blockline_types::conn::DatasetRepoConnConfig;
use blockline_types::ConnectorError;
use bytes::Bytes;
use serde_json::json;

use super::ConnectionPool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Authenticated handle to the hub API.
#[derive(Clone)]
pub struct HubClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

/// Target of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef<'a> {
    pub repo_id: &'a str,
    pub repo_type: &'a str,
    pub revision: &'a str,
}

impl HubClient {
    /// Commit `files` (`(path_in_repo, content)`) in a single request.
    ///
    /// # Errors
    ///
    /// Returns `Load` if the request fails or the hub rejects the commit.
    pub async fn commit(
        &self,
        repo: &RepoRef<'_>,
        summary: &str,
        files: &[(String, Bytes)],
    ) -> Result<(), ConnectorError> {
        let url = commit_url(&self.endpoint, repo);
        let body = commit_body(summary, files)?;
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| ConnectorError::load(format!("commit to {} failed: {e}", repo.repo_id)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConnectorError::load(format!(
                "hub rejected commit to {} ({status}): {detail}",
                repo.repo_id
            )));
        }
        Ok(())
    }
}

/// `{endpoint}/api/{repo_type}s/{repo_id}/commit/{revision}`
pub(crate) fn commit_url(endpoint: &str, repo: &RepoRef<'_>) -> String {
    format!(
        "{}/api/{}s/{}/commit/{}",
        endpoint.trim_end_matches('/'),
        repo.repo_type,
        repo.repo_id,
        repo.revision.replace('/', "%2F")
    )
}

pub(crate) fn commit_body(summary: &str, files: &[(String, Bytes)]) -> Result<String, ConnectorError> {
    let encoder = base64::engine::general_purpose::STANDARD;
    let mut lines = Vec::with_capacity(files.len() + 1);
    lines.push(json!({"key": "header", "value": {"summary": summary, "description": ""}}));
    for (path, content) in files {
        lines.push(json!({
            "key": "file",
            "value": {"path": path, "content": encoder.encode(content), "encoding": "base64"}
        }));
    }

    let mut body = String::new();
    for line in lines {
        let text = serde_json::to_string(&line)
            .map_err(|e| ConnectorError::load(format!("cannot encode commit payload: {e}")))?;
        body.push_str(&text);
        body.push('\n');
    }
    Ok(body)
}

pub struct DatasetRepoPool {
    config: DatasetRepoConnConfig,
    http: Mutex<Option<reqwest::Client>>,
}

impl DatasetRepoPool {
    #[must_use]
    pub fn new(config: &DatasetRepoConnConfig) -> Arc<Self> {
        Arc::new(Self {
            config: config.clone(),
            http: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ConnectionPool for DatasetRepoPool {
    type Handle = HubClient;

    async fn acquire(&self) -> Result<HubClient, ConnectorError> {
        let mut slot = self.http.lock().unwrap_or_else(PoisonError::into_inner);
        let http = match slot.as_ref() {
            Some(http) => http.clone(),
            None => {
                let http = reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .map_err(|e| ConnectorError::connection(format!("cannot build http client: {e}")))?;
                *slot = Some(http.clone());
                http
            }
        };
        Ok(HubClient {
            http,
            endpoint: self.config.endpoint.clone(),
            token: self.config.access_token.clone(),
        })
    }

    fn release(&self, _handle: HubClient) {}
}
