//! Notification lifecycle routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", post(create_notification))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}", get(get_notification_status))
        .route("/api/notifications/{id}", delete(cancel_notification))
}

/// JSON body for notification creation. `send_at` is RFC3339.
#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub message: String,
    pub send_at: DateTime<Utc>,
    pub retries: i32,
    pub to: String,
    pub channel: String,
}

impl CreateNotificationRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.message.trim().is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }
        if self.to.trim().is_empty() {
            return Err(AppError::Validation("to must not be empty".to_string()));
        }
        if self.channel.trim().is_empty() {
            return Err(AppError::Validation("channel must not be empty".to_string()));
        }
        if self.retries < 0 {
            return Err(AppError::Validation("retries must not be negative".to_string()));
        }
        Ok(())
    }
}

/// POST /api/notifications — Schedule a new notification.
async fn create_notification(
    State(state): State<AppState>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    req.validate()?;

    let now = Utc::now();
    let notification = Notification {
        id: Uuid::nil(),
        message: req.message,
        send_at: req.send_at,
        status: NotificationStatus::Pending,
        retries: req.retries,
        to: req.to,
        channel: req.channel,
        created_at: now,
        updated_at: now,
    };

    let id = state
        .service
        .create_notification(&state.config.retry_strategy(), notification)
        .await?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

/// GET /api/notifications — List every notification, newest scheduled first.
async fn list_notifications(
    State(state): State<AppState>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = state.service.all_notifications().await?;
    Ok(Json(notifications))
}

/// GET /api/notifications/:id — Current delivery status.
async fn get_notification_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state
        .service
        .notification_status(&state.config.retry_strategy(), id)
        .await?;

    Ok(Json(serde_json::json!({ "id": id, "status": status })))
}

/// DELETE /api/notifications/:id — Cancel a pending notification.
///
/// Best-effort: a message already picked up by a worker can still be
/// delivered; the worker's pre-send status check is the enforcement point.
async fn cancel_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .service
        .set_status(
            &state.config.retry_strategy(),
            id,
            NotificationStatus::Cancelled,
        )
        .await?;

    Ok(Json(
        serde_json::json!({ "id": id, "status": NotificationStatus::Cancelled }),
    ))
}
