//! Bounded `PostgreSQL` connection pool.
//!
//! At most `maxConn` handles are checked out at once. Up to
//! `maxConn - minConn` connections are kept for reuse; any connection beyond
//! that is closed on release. Every checkout pings the connection first and
//! opens a transaction, which the session scope commits or rolls back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use blockline_types::conn::RelationalConnConfig;
use blockline_types::ConnectorError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::{Client, Config as PgConfig, NoTls};

use super::ConnectionPool;

pub struct RelationalPool {
    config: RelationalConnConfig,
    idle: Mutex<Vec<Client>>,
    permits: Arc<Semaphore>,
}

/// A checked-out connection with an open transaction.
pub struct PgHandle {
    client: Client,
    in_transaction: AtomicBool,
    _permit: OwnedSemaphorePermit,
}

impl PgHandle {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl RelationalPool {
    /// Build the pool and prove it can reach the server.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` for inconsistent bounds and `Connection`
    /// when the first checkout fails.
    pub async fn connect(config: &RelationalConnConfig) -> Result<Arc<Self>, ConnectorError> {
        config.validate()?;
        let pool = Arc::new(Self::new(config.clone()));
        let handle = pool.acquire().await?;
        pool.rollback(&handle).await?;
        pool.release(handle);
        tracing::debug!(target_db = %config.display_target(), "relational pool ready");
        Ok(pool)
    }

    fn new(config: RelationalConnConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_conn as usize));
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            permits,
        }
    }

    fn pg_config(&self) -> PgConfig {
        let mut pg = PgConfig::new();
        pg.host(&self.config.host);
        pg.port(self.config.port);
        pg.user(&self.config.user);
        if !self.config.password.is_empty() {
            pg.password(&self.config.password);
        }
        pg.dbname(&self.config.database);
        pg.application_name("blockline");
        pg
    }

    async fn open(&self) -> Result<Client, ConnectorError> {
        let (client, connection) = self.pg_config().connect(NoTls).await.map_err(|e| {
            ConnectorError::connection(format!(
                "could not connect to {}: {e}",
                self.config.display_target()
            ))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection error");
            }
        });

        Ok(client)
    }

    /// Reuse an idle connection that still answers, or open a new one.
    async fn checkout_client(&self) -> Result<Client, ConnectorError> {
        loop {
            let candidate = self.lock_idle().pop();
            let Some(client) = candidate else {
                return self.open().await;
            };
            if client.is_closed() {
                continue;
            }
            match client.simple_query("SELECT 1").await {
                Ok(_) => return Ok(client),
                Err(e) => tracing::debug!(error = %e, "dropping stale pooled connection"),
            }
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Client>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn idle_len(&self) -> usize {
        self.lock_idle().len()
    }
}

#[async_trait]
impl ConnectionPool for RelationalPool {
    type Handle = PgHandle;

    async fn acquire(&self) -> Result<PgHandle, ConnectorError> {
        let wait = Duration::from_secs(self.config.acquire_timeout_secs);
        let permit = tokio::time::timeout(wait, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| {
                ConnectorError::connection(format!(
                    "timed out after {}s waiting for a connection to {}",
                    self.config.acquire_timeout_secs,
                    self.config.display_target()
                ))
            })?
            .map_err(|_| ConnectorError::connection("connection pool is closed"))?;

        let client = self.checkout_client().await?;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| ConnectorError::connection(format!("BEGIN failed: {e}")))?;

        Ok(PgHandle {
            client,
            in_transaction: AtomicBool::new(true),
            _permit: permit,
        })
    }

    fn release(&self, handle: PgHandle) {
        let PgHandle {
            client,
            in_transaction,
            _permit,
        } = handle;
        if in_transaction.load(Ordering::Acquire) || client.is_closed() {
            return;
        }
        let mut idle = self.lock_idle();
        if idle.len() < self.config.idle_slots() {
            idle.push(client);
        }
    }

    async fn commit(&self, handle: &PgHandle) -> Result<(), ConnectorError> {
        handle
            .client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| ConnectorError::connection(format!("COMMIT failed: {e}")))?;
        handle.in_transaction.store(false, Ordering::Release);
        Ok(())
    }

    async fn rollback(&self, handle: &PgHandle) -> Result<(), ConnectorError> {
        handle
            .client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| ConnectorError::connection(format!("ROLLBACK failed: {e}")))?;
        handle.in_transaction.store(false, Ordering::Release);
        Ok(())
    }
}
