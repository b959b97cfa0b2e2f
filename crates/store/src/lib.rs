//! Durable notification storage.
//!
//! The [`NotificationStore`] trait is the capability the dispatch service
//! requires; [`PgNotificationStore`] is the PostgreSQL implementation. The
//! store is the single source of truth for a notification's canonical
//! state — the status cache holds a derived copy only.

pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus};

pub use postgres::PgNotificationStore;

/// Persistence capability consumed by the dispatch service.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new notification and return its assigned id.
    async fn create_notification(&self, notification: &Notification) -> Result<Uuid, AppError>;

    /// Transition a notification's status. Fails with
    /// [`AppError::NotFound`] when no row matches the id.
    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> Result<(), AppError>;

    /// Current status of a notification, or [`AppError::NotFound`].
    async fn status_by_id(&self, id: Uuid) -> Result<NotificationStatus, AppError>;

    /// Every stored notification, newest scheduled first.
    async fn all_notifications(&self) -> Result<Vec<Notification>, AppError>;
}
