//! PostgreSQL-backed notification store.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus};

use crate::NotificationStore;

/// sqlx implementation of [`NotificationStore`].
///
/// Safe for concurrent use from every worker; the pool provides its own
/// synchronization.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create_notification(&self, notification: &Notification) -> Result<Uuid, AppError> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications (message, send_at, status, retries, "to", channel)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&notification.message)
        .bind(notification.send_at)
        .bind(notification.status.to_string())
        .bind(notification.retries)
        .bind(&notification.to)
        .bind(&notification.channel)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $1, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(status.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Notification {id} not found")));
        }

        Ok(())
    }

    async fn status_by_id(&self, id: Uuid) -> Result<NotificationStatus, AppError> {
        let row = sqlx::query("SELECT status FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {id} not found")))?;

        let status: NotificationStatus = row.get("status");
        Ok(status)
    }

    async fn all_notifications(&self) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, message, send_at, status, retries, "to", channel, created_at, updated_at
            FROM notifications
            ORDER BY send_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }
}
