//! Request-scoped distributed SQL session descriptors.
//!
//! Each acquire describes a fresh session against either a remote session
//! endpoint (`sc://...`) or a cluster master; release discards it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use blockline_types::conn::DistributedSqlConnConfig;
use blockline_types::ConnectorError;

use super::ConnectionPool;

const REMOTE_SCHEME: &str = "sc://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSessionTarget {
    /// Remote session endpoint.
    Remote(String),
    /// Cluster master URL (`local[*]`, `yarn`, `spark://...`).
    Master(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSession {
    pub target: SqlSessionTarget,
    pub app_name: String,
    pub conf: BTreeMap<String, String>,
}

pub struct DistributedSqlPool {
    config: DistributedSqlConnConfig,
}

impl DistributedSqlPool {
    /// # Errors
    ///
    /// Returns `ConfigValidation` when the DSN is blank.
    pub fn new(config: &DistributedSqlConnConfig) -> Result<Arc<Self>, ConnectorError> {
        if config.dsn.trim().is_empty() {
            return Err(ConnectorError::config("distributedSql connection: dsn must not be empty"));
        }
        Ok(Arc::new(Self {
            config: config.clone(),
        }))
    }
}

#[async_trait]
impl ConnectionPool for DistributedSqlPool {
    type Handle = SqlSession;

    async fn acquire(&self) -> Result<SqlSession, ConnectorError> {
        let dsn = self.config.dsn.trim();
        let target = if dsn.starts_with(REMOTE_SCHEME) {
            SqlSessionTarget::Remote(dsn.to_string())
        } else {
            SqlSessionTarget::Master(dsn.to_string())
        };
        Ok(SqlSession {
            target,
            app_name: self.config.app_name.clone(),
            conf: self.config.conf.clone(),
        })
    }

    fn release(&self, session: SqlSession) {
        tracing::debug!(app = %session.app_name, "distributed sql session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dsn: &str) -> DistributedSqlConnConfig {
        DistributedSqlConnConfig {
            dsn: dsn.to_string(),
            app_name: "nightly".into(),
            conf: BTreeMap::from([("spark.executor.memory".to_string(), "4g".to_string())]),
        }
    }

    #[tokio::test]
    async fn sc_scheme_selects_remote_session() {
        let pool = DistributedSqlPool::new(&config("sc://cluster:15002")).unwrap();
        let session = pool.acquire().await.unwrap();
        assert_eq!(
            session.target,
            SqlSessionTarget::Remote("sc://cluster:15002".into())
        );
        assert_eq!(session.conf["spark.executor.memory"], "4g");
    }

    #[tokio::test]
    async fn other_dsn_is_master_url() {
        let pool = DistributedSqlPool::new(&config("local[2]")).unwrap();
        let session = pool.acquire().await.unwrap();
        assert_eq!(session.target, SqlSessionTarget::Master("local[2]".into()));
    }

    #[test]
    fn blank_dsn_rejected() {
        assert!(DistributedSqlPool::new(&config("  ")).is_err());
    }
}
