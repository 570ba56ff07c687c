//! Connection pools and the reentrant session scope.
//!
//! A pool hands out handles (`acquire`) and takes them back (`release`). A
//! [`Session`] wraps a pool and gives callers a scope: the first scope on a
//! session acquires a handle, commits on success or rolls back on failure,
//! and always releases; scopes opened while one is active reuse its handle.

pub mod dataset_repo;
pub mod distributed_sql;
pub mod object_storage;
pub mod relational;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use blockline_types::ConnectorError;

pub use dataset_repo::{DatasetRepoPool, HubClient, RepoRef};
pub use distributed_sql::{DistributedSqlPool, SqlSession, SqlSessionTarget};
pub use object_storage::ObjectStoragePool;
pub use relational::{PgHandle, RelationalPool};

/// A source of connection handles for one external system.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    /// Check out a handle, creating one when needed.
    async fn acquire(&self) -> Result<Self::Handle, ConnectorError>;

    /// Return a handle. Pools that keep nothing simply drop it.
    fn release(&self, handle: Self::Handle);

    async fn commit(&self, _handle: &Self::Handle) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn rollback(&self, _handle: &Self::Handle) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Scoped, reentrant access to a pool.
pub struct Session<P: ConnectionPool> {
    pool: Arc<P>,
    current: Mutex<Option<Arc<P::Handle>>>,
}

impl<P: ConnectionPool> Session<P> {
    pub fn new(pool: Arc<P>) -> Self {
        Self {
            pool,
            current: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    /// Whether a scope is currently open on this session.
    pub fn in_scope(&self) -> bool {
        self.lock_current().is_some()
    }

    /// Run `f` with a live handle.
    ///
    /// The outermost scope owns the handle: it commits when `f` succeeds,
    /// rolls back when `f` fails, and releases the handle on every exit path,
    /// including cancellation. Nested scopes only borrow the handle.
    ///
    /// # Errors
    ///
    /// Returns the acquire error, the error from `f`, or the commit error.
    pub async fn scope<T, F, Fut>(&self, f: F) -> Result<T, ConnectorError>
    where
        F: FnOnce(Arc<P::Handle>) -> Fut + Send,
        Fut: Future<Output = Result<T, ConnectorError>> + Send,
        T: Send,
    {
        let active = self.lock_current().clone();
        if let Some(handle) = active {
            return f(handle).await;
        }

        let acquired = self.pool.acquire().await?;
        let guard = ScopeGuard { session: self };
        let handle = Arc::new(acquired);
        *self.lock_current() = Some(Arc::clone(&handle));

        let result = f(Arc::clone(&handle)).await;
        let outcome = match &result {
            Ok(_) => self.pool.commit(&handle).await,
            Err(err) => {
                if let Err(rollback_err) = self.pool.rollback(&handle).await {
                    tracing::warn!(error = %rollback_err, cause = %err, "rollback failed");
                }
                Ok(())
            }
        };
        drop(handle);
        drop(guard);

        let value = result?;
        outcome.map(|()| value)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<P::Handle>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the session's active handle and releases it back to the pool.
///
/// Declared before the handle so it drops last, on every exit path.
struct ScopeGuard<'a, P: ConnectionPool> {
    session: &'a Session<P>,
}

impl<P: ConnectionPool> Drop for ScopeGuard<'_, P> {
    fn drop(&mut self) {
        let Some(handle) = self.session.lock_current().take() else {
            return;
        };
        match Arc::try_unwrap(handle) {
            Ok(handle) => self.session.pool.release(handle),
            Err(_) => tracing::warn!("session handle still shared at scope exit, dropping it"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pool that counts lifecycle calls.
    #[derive(Default)]
    struct CountingPool {
        acquired: AtomicUsize,
        released: AtomicUsize,
        committed: AtomicUsize,
        rolled_back: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionPool for CountingPool {
        type Handle = usize;

        async fn acquire(&self) -> Result<usize, ConnectorError> {
            Ok(self.acquired.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn release(&self, _handle: usize) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        async fn commit(&self, _handle: &usize) -> Result<(), ConnectorError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self, _handle: &usize) -> Result<(), ConnectorError> {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn outer_scope_commits_and_releases() {
        let pool = Arc::new(CountingPool::default());
        let session = Session::new(Arc::clone(&pool));
        let got = session.scope(|h| async move { Ok(*h) }).await.unwrap();
        assert_eq!(got, 1);
        assert_eq!(pool.committed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.released.load(Ordering::SeqCst), 1);
        assert!(!session.in_scope());
    }

    #[tokio::test]
    async fn nested_scope_reuses_handle() {
        let pool = Arc::new(CountingPool::default());
        let session = Session::new(Arc::clone(&pool));
        let (outer, inner) = session
            .scope(|outer| {
                let session = &session;
                async move {
                    let inner = session.scope(|inner| async move { Ok(*inner) }).await?;
                    Ok((*outer, inner))
                }
            })
            .await
            .unwrap();
        assert_eq!(outer, inner);
        assert_eq!(pool.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(pool.committed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_scope_rolls_back_and_releases() {
        let pool = Arc::new(CountingPool::default());
        let session = Session::new(Arc::clone(&pool));
        let err = session
            .scope(|_h| async move { Err::<(), _>(ConnectorError::load("write failed")) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("write failed"));
        assert_eq!(pool.rolled_back.load(Ordering::SeqCst), 1);
        assert_eq!(pool.committed.load(Ordering::SeqCst), 0);
        assert_eq!(pool.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_scopes_acquire_fresh_handles() {
        let pool = Arc::new(CountingPool::default());
        let session = Session::new(Arc::clone(&pool));
        let first = session.scope(|h| async move { Ok(*h) }).await.unwrap();
        let second = session.scope(|h| async move { Ok(*h) }).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.released.load(Ordering::SeqCst), 2);
    }
}
