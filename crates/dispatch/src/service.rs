//! The dispatch service: notification lifecycle and channel resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::retry::RetryStrategy;
use herald_common::types::{DispatchMessage, Notification, NotificationStatus};
use herald_queue::DelayPublisher;
use herald_store::NotificationStore;

use crate::cache::StatusCache;

/// A delivery channel: sends `message` to `to`, whatever those mean for the
/// concrete transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, message: &str) -> Result<(), AppError>;
}

/// Orchestrates store, cache, queue, and notifiers.
///
/// The store is authoritative for every lifecycle transition; cache seeding
/// and queue publishing are fire-and-forget so a degraded cache or broker
/// never fails creation once the record is durable.
pub struct DispatchService<S, C, P> {
    store: S,
    cache: C,
    publisher: P,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl<S, C, P> DispatchService<S, C, P>
where
    S: NotificationStore,
    C: StatusCache,
    P: DelayPublisher,
{
    pub fn new(
        store: S,
        cache: C,
        publisher: P,
        notifiers: HashMap<String, Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            notifiers,
        }
    }

    /// Persist a notification, then best-effort seed the cache and enqueue
    /// the dispatch message. Returns the assigned id.
    pub async fn create_notification(
        &self,
        strategy: &RetryStrategy,
        mut notification: Notification,
    ) -> Result<Uuid, AppError> {
        let id = self.store.create_notification(&notification).await?;
        notification.id = id;

        if let Err(e) = self
            .cache
            .set_with_retry(strategy, &id.to_string(), notification.status)
            .await
        {
            tracing::error!(id = %id, error = %e, "Failed to seed notification status cache");
        }

        let msg = DispatchMessage::from_notification(&notification);
        if let Err(e) = self.publisher.publish(&msg, strategy).await {
            tracing::error!(id = %id, error = %e, "Failed to publish notification");
        }

        Ok(id)
    }

    /// Cache-aside status read: cache first, store on miss (repopulating
    /// the cache), store on any other cache error too.
    pub async fn notification_status(
        &self,
        strategy: &RetryStrategy,
        id: Uuid,
    ) -> Result<NotificationStatus, AppError> {
        match self.cache.get_with_retry(strategy, &id.to_string()).await {
            Ok(status) => return Ok(status),
            Err(AppError::CacheMiss) => {}
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to get notification status from cache");
            }
        }

        let status = self.store.status_by_id(id).await?;

        if let Err(e) = self
            .cache
            .set_with_retry(strategy, &id.to_string(), status)
            .await
        {
            tracing::error!(id = %id, error = %e, "Failed to repopulate notification status cache");
        }

        Ok(status)
    }

    /// Transition a notification's status: store first (authoritative,
    /// [`AppError::NotFound`] when the id is unknown), then best-effort
    /// cache update. This is the single transition point used by both the
    /// HTTP cancel path and the send handler's terminal reporting.
    pub async fn set_status(
        &self,
        strategy: &RetryStrategy,
        id: Uuid,
        status: NotificationStatus,
    ) -> Result<(), AppError> {
        self.store.update_status(id, status).await?;

        if let Err(e) = self
            .cache
            .set_with_retry(strategy, &id.to_string(), status)
            .await
        {
            tracing::error!(id = %id, error = %e, "Failed to update notification status cache");
        }

        Ok(())
    }

    /// Every stored notification; [`AppError::NotFound`] when none exist.
    pub async fn all_notifications(&self) -> Result<Vec<Notification>, AppError> {
        let notifications = self.store.all_notifications().await?;
        if notifications.is_empty() {
            return Err(AppError::NotFound("no notifications found".to_string()));
        }
        Ok(notifications)
    }

    /// Deliver through the notifier registered for `channel`.
    pub async fn send(&self, to: &str, message: &str, channel: &str) -> Result<(), AppError> {
        let notifier = self
            .notifiers
            .get(channel)
            .ok_or_else(|| AppError::UnknownChannel(channel.to_string()))?;

        notifier.send(to, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::Utc;

    fn strategy() -> RetryStrategy {
        RetryStrategy::new(1, Duration::from_millis(1), 2.0)
    }

    fn sample(status: NotificationStatus) -> Notification {
        Notification {
            id: Uuid::nil(),
            message: "hi".to_string(),
            send_at: Utc::now() + chrono::Duration::seconds(2),
            status,
            retries: 3,
            to: "a@b.com".to_string(),
            channel: "email".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FakeStore {
        statuses: Mutex<HashMap<Uuid, NotificationStatus>>,
        status_reads: AtomicU32,
    }

    #[async_trait]
    impl NotificationStore for FakeStore {
        async fn create_notification(&self, n: &Notification) -> Result<Uuid, AppError> {
            let id = Uuid::new_v4();
            self.statuses.lock().unwrap().insert(id, n.status);
            Ok(id)
        }

        async fn update_status(
            &self,
            id: Uuid,
            status: NotificationStatus,
        ) -> Result<(), AppError> {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(&id) {
                Some(slot) => {
                    *slot = status;
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("Notification {id} not found"))),
            }
        }

        async fn status_by_id(&self, id: Uuid) -> Result<NotificationStatus, AppError> {
            self.status_reads.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .get(&id)
                .copied()
                .ok_or_else(|| AppError::NotFound(format!("Notification {id} not found")))
        }

        async fn all_notifications(&self) -> Result<Vec<Notification>, AppError> {
            let statuses = self.statuses.lock().unwrap();
            Ok(statuses
                .iter()
                .map(|(id, status)| {
                    let mut n = sample(*status);
                    n.id = *id;
                    n
                })
                .collect())
        }
    }

    /// Cache fake: `fail_sets` makes writes error, `error_reads` makes
    /// reads fail with a non-miss error.
    #[derive(Default)]
    struct FakeCache {
        entries: Mutex<HashMap<String, NotificationStatus>>,
        fail_sets: bool,
        error_reads: bool,
    }

    #[async_trait]
    impl StatusCache for FakeCache {
        async fn set_with_retry(
            &self,
            _strategy: &RetryStrategy,
            key: &str,
            value: NotificationStatus,
        ) -> Result<(), AppError> {
            if self.fail_sets {
                return Err(AppError::Internal("cache down".to_string()));
            }
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value);
            Ok(())
        }

        async fn get_with_retry(
            &self,
            _strategy: &RetryStrategy,
            key: &str,
        ) -> Result<NotificationStatus, AppError> {
            if self.error_reads {
                return Err(AppError::Internal("cache down".to_string()));
            }
            self.entries
                .lock()
                .unwrap()
                .get(key)
                .copied()
                .ok_or(AppError::CacheMiss)
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        published: Mutex<Vec<DispatchMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl DelayPublisher for FakePublisher {
        async fn publish(
            &self,
            msg: &DispatchMessage,
            _strategy: &RetryStrategy,
        ) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Publish("broker down".to_string()));
            }
            self.published.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _to: &str, _message: &str) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(
        store: FakeStore,
        cache: FakeCache,
        publisher: FakePublisher,
    ) -> (
        DispatchService<FakeStore, FakeCache, FakePublisher>,
        Arc<CountingNotifier>,
    ) {
        let notifier = Arc::new(CountingNotifier::default());
        let notifiers: HashMap<String, Arc<dyn Notifier>> = HashMap::from([(
            "email".to_string(),
            notifier.clone() as Arc<dyn Notifier>,
        )]);
        (
            DispatchService::new(store, cache, publisher, notifiers),
            notifier,
        )
    }

    #[tokio::test]
    async fn test_create_seeds_cache_and_publishes() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );

        let id = svc
            .create_notification(&strategy(), sample(NotificationStatus::Pending))
            .await
            .unwrap();
        assert_ne!(id, Uuid::nil());

        let cached = svc
            .cache
            .entries
            .lock()
            .unwrap()
            .get(&id.to_string())
            .copied();
        assert_eq!(cached, Some(NotificationStatus::Pending));

        let published = svc.publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, id);
        assert_eq!(published[0].to, "a@b.com");
    }

    #[tokio::test]
    async fn test_create_survives_cache_and_publish_failures() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache {
                fail_sets: true,
                ..Default::default()
            },
            FakePublisher {
                fail: true,
                ..Default::default()
            },
        );

        // Fire-and-forget: durability happened in the store, so creation
        // still succeeds and the status is readable from it.
        let id = svc
            .create_notification(&strategy(), sample(NotificationStatus::Pending))
            .await
            .unwrap();
        let status = svc.notification_status(&strategy(), id).await.unwrap();
        assert_eq!(status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_read_prefers_cache() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );
        let id = svc
            .create_notification(&strategy(), sample(NotificationStatus::Pending))
            .await
            .unwrap();

        let status = svc.notification_status(&strategy(), id).await.unwrap();
        assert_eq!(status, NotificationStatus::Pending);
        // Seeded at creation, so the store was never read.
        assert_eq!(svc.store.status_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_and_repopulates() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );
        let id = svc
            .create_notification(&strategy(), sample(NotificationStatus::Pending))
            .await
            .unwrap();
        svc.cache.entries.lock().unwrap().clear();

        let status = svc.notification_status(&strategy(), id).await.unwrap();
        assert_eq!(status, NotificationStatus::Pending);
        assert_eq!(svc.store.status_reads.load(Ordering::SeqCst), 1);

        // Repopulated: the next read must not hit the store again.
        let status = svc.notification_status(&strategy(), id).await.unwrap();
        assert_eq!(status, NotificationStatus::Pending);
        assert_eq!(svc.store.status_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_error_fails_open_to_store() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache {
                error_reads: true,
                ..Default::default()
            },
            FakePublisher::default(),
        );
        let id = svc
            .create_notification(&strategy(), sample(NotificationStatus::Pending))
            .await
            .unwrap();

        let status = svc.notification_status(&strategy(), id).await.unwrap();
        assert_eq!(status, NotificationStatus::Pending);
        assert_eq!(svc.store.status_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_read_unknown_id_is_not_found() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );

        let err = svc
            .notification_status(&strategy(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_status_writes_store_then_cache() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );
        let id = svc
            .create_notification(&strategy(), sample(NotificationStatus::Pending))
            .await
            .unwrap();

        svc.set_status(&strategy(), id, NotificationStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(
            svc.store.statuses.lock().unwrap().get(&id).copied(),
            Some(NotificationStatus::Cancelled)
        );
        assert_eq!(
            svc.cache
                .entries
                .lock()
                .unwrap()
                .get(&id.to_string())
                .copied(),
            Some(NotificationStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_set_status_unknown_id_is_not_found() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );

        let err = svc
            .set_status(&strategy(), Uuid::new_v4(), NotificationStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(svc.cache.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_resolves_channel() {
        let (svc, notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );

        svc.send("a@b.com", "hi", "email").await.unwrap();
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);

        let err = svc.send("a@b.com", "hi", "pigeon").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownChannel(_)));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_notifications_empty_is_not_found() {
        let (svc, _notifier) = service(
            FakeStore::default(),
            FakeCache::default(),
            FakePublisher::default(),
        );

        let err = svc.all_notifications().await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
