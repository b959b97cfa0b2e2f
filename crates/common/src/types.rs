use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a notification.
///
/// Transitions move one-way toward a terminal state. `Pending → Cancelled`
/// may race with `Pending → Sent`/`Pending → Failed`; the worker's pre-send
/// status check is the only enforcement point, so a message already in
/// flight can still complete after a late cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    /// Whether this status ends the notification's lifecycle.
    pub fn is_terminal(self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
            NotificationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            other => Err(format!("unknown notification status: {other}")),
        }
    }
}

/// A notification scheduled for future delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub send_at: DateTime<Utc>,
    pub status: NotificationStatus,
    /// Configured maximum attempt count, carried with the record for
    /// operator visibility. The dispatch retry strategy governs the actual
    /// attempt budget.
    pub retries: i32,
    /// Recipient identifier: an email address, chat id, etc.
    pub to: String,
    /// Delivery channel name, resolved against the notifier set at send time.
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The queue-carried projection of a [`Notification`].
///
/// Created at enqueue time and discarded after handling; never persisted.
/// The wire name for the recipient is `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub id: Uuid,
    pub send_at: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "user_id")]
    pub to: String,
    pub retries: i32,
    pub channel: String,
}

impl DispatchMessage {
    /// Project a stored notification into its queue payload.
    pub fn from_notification(n: &Notification) -> Self {
        Self {
            id: n.id,
            send_at: n.send_at,
            message: n.message.clone(),
            to: n.to.clone(),
            retries: n.retries,
            channel: n.channel.clone(),
        }
    }
}
