//! Redis-backed status cache.
//!
//! Holds a derived, possibly-stale copy of each notification's status so
//! the hot read path (workers polling before send, HTTP status queries)
//! rarely touches PostgreSQL. Authority is subordinate to the store: any
//! miss or error falls open to it.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use herald_common::error::AppError;
use herald_common::retry::{RetryStrategy, retry};
use herald_common::types::NotificationStatus;

/// Key→status cache with bounded-retry operations.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Store a status, retrying transient failures per `strategy`.
    async fn set_with_retry(
        &self,
        strategy: &RetryStrategy,
        key: &str,
        value: NotificationStatus,
    ) -> Result<(), AppError>;

    /// Read a status. An absent key is the distinguished
    /// [`AppError::CacheMiss`], not a generic error.
    async fn get_with_retry(
        &self,
        strategy: &RetryStrategy,
        key: &str,
    ) -> Result<NotificationStatus, AppError>;
}

/// [`StatusCache`] over a shared Redis connection manager.
#[derive(Clone)]
pub struct RedisStatusCache {
    conn: ConnectionManager,
}

impl RedisStatusCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn cache_key(key: &str) -> String {
        format!("notification:status:{key}")
    }
}

#[async_trait]
impl StatusCache for RedisStatusCache {
    async fn set_with_retry(
        &self,
        strategy: &RetryStrategy,
        key: &str,
        value: NotificationStatus,
    ) -> Result<(), AppError> {
        let cache_key = Self::cache_key(key);
        let value = value.to_string();

        retry(strategy, || {
            let mut conn = self.conn.clone();
            let cache_key = cache_key.clone();
            let value = value.clone();
            async move { conn.set::<_, _, ()>(&cache_key, &value).await }
        })
        .await?;

        Ok(())
    }

    async fn get_with_retry(
        &self,
        strategy: &RetryStrategy,
        key: &str,
    ) -> Result<NotificationStatus, AppError> {
        let cache_key = Self::cache_key(key);

        let value: Option<String> = retry(strategy, || {
            let mut conn = self.conn.clone();
            let cache_key = cache_key.clone();
            async move { conn.get::<_, Option<String>>(&cache_key).await }
        })
        .await?;

        match value {
            None => Err(AppError::CacheMiss),
            Some(raw) => raw.parse().map_err(|_| {
                tracing::warn!(key = %cache_key, value = %raw, "Unparseable cached status, treating as miss");
                AppError::CacheMiss
            }),
        }
    }
}
