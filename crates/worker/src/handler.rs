//! The send handler: bounded-backoff delivery and terminal reporting.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::retry::RetryStrategy;
use herald_common::types::{DispatchMessage, NotificationStatus};
use herald_dispatch::{DispatchService, StatusCache};
use herald_queue::DelayPublisher;
use herald_store::NotificationStore;

/// What the handler needs from the dispatch service: channel delivery and
/// the status transition point.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    async fn send(&self, to: &str, message: &str, channel: &str) -> Result<(), AppError>;

    async fn set_status(
        &self,
        strategy: &RetryStrategy,
        id: Uuid,
        status: NotificationStatus,
    ) -> Result<(), AppError>;
}

#[async_trait]
impl<S, C, P> DeliveryService for DispatchService<S, C, P>
where
    S: NotificationStore,
    C: StatusCache,
    P: DelayPublisher,
{
    async fn send(&self, to: &str, message: &str, channel: &str) -> Result<(), AppError> {
        DispatchService::send(self, to, message, channel).await
    }

    async fn set_status(
        &self,
        strategy: &RetryStrategy,
        id: Uuid,
        status: NotificationStatus,
    ) -> Result<(), AppError> {
        DispatchService::set_status(self, strategy, id, status).await
    }
}

/// Message-handling capability consumed by the worker pool.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(
        &self,
        token: &CancellationToken,
        msg: &DispatchMessage,
        strategy: &RetryStrategy,
    );
}

/// Attempts delivery with bounded exponential backoff and reports the
/// terminal outcome through the dispatch service.
pub struct SendHandler<D> {
    service: Arc<D>,
}

impl<D> SendHandler<D> {
    pub fn new(service: Arc<D>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<D: DeliveryService> MessageHandler for SendHandler<D> {
    /// Run the delivery attempt loop for one message.
    ///
    /// Permanent errors (unknown channel) are not retried. The wait between
    /// attempts observes cancellation: a cancelled token is an immediate
    /// terminal failure, not one more retry. Terminal status is reported
    /// either way; a failed report is logged, never retried recursively.
    async fn handle_message(
        &self,
        token: &CancellationToken,
        msg: &DispatchMessage,
        strategy: &RetryStrategy,
    ) {
        tracing::info!(id = %msg.id, send_at = %msg.send_at, "Handling dispatch message");

        let mut schedule = strategy.schedule();
        let outcome = loop {
            if token.is_cancelled() {
                break Err(AppError::Cancelled);
            }

            tracing::debug!(id = %msg.id, channel = %msg.channel, "Attempting delivery");
            match self.service.send(&msg.to, &msg.message, &msg.channel).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_permanent() => break Err(e),
                Err(e) => match schedule.backoff() {
                    None => break Err(e),
                    Some(wait) => {
                        tokio::select! {
                            _ = token.cancelled() => break Err(AppError::Cancelled),
                            _ = tokio::time::sleep(wait) => {}
                        }
                    }
                },
            }
        };

        let terminal = match &outcome {
            Ok(()) => {
                tracing::info!(id = %msg.id, "Notification sent");
                NotificationStatus::Sent
            }
            Err(e) => {
                tracing::warn!(id = %msg.id, error = %e, "Notification delivery failed");
                NotificationStatus::Failed
            }
        };

        if let Err(e) = self.service.set_status(strategy, msg.id, terminal).await {
            match e {
                AppError::NotFound(_) => {
                    tracing::warn!(id = %msg.id, "Notification missing while reporting terminal status");
                }
                e => {
                    tracing::error!(id = %msg.id, status = %terminal, error = %e, "Failed to report terminal status");
                }
            }
        }
    }
}
