//! The dispatcher worker pool.
//!
//! One bridge task drains the delay queue into a bounded channel
//! (capacity `worker_count × 10`, so a stalled pool backpressures the
//! broker consumer instead of growing memory). Workers pull from the
//! shared receiver, re-check live status to honor cancellation, and run
//! the handler inline; parallelism comes from the worker count, never
//! from handler-internal concurrency.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::retry::RetryStrategy;
use herald_common::types::{DispatchMessage, NotificationStatus};
use herald_dispatch::{DispatchService, StatusCache};
use herald_queue::{DelayPublisher, DelaySource};
use herald_store::NotificationStore;

use crate::handler::MessageHandler;

/// Live-status lookup consumed by workers for the cancellation check.
#[async_trait]
pub trait StatusReader: Send + Sync {
    async fn status_by_id(
        &self,
        strategy: &RetryStrategy,
        id: Uuid,
    ) -> Result<NotificationStatus, AppError>;
}

#[async_trait]
impl<S, C, P> StatusReader for DispatchService<S, C, P>
where
    S: NotificationStore,
    C: StatusCache,
    P: DelayPublisher,
{
    async fn status_by_id(
        &self,
        strategy: &RetryStrategy,
        id: Uuid,
    ) -> Result<NotificationStatus, AppError> {
        self.notification_status(strategy, id).await
    }
}

/// Consumes the delay queue and fans messages out to a fixed worker set.
pub struct Dispatcher<Q, H, S> {
    queue: Arc<Q>,
    handler: Arc<H>,
    service: Arc<S>,
}

impl<Q, H, S> Dispatcher<Q, H, S>
where
    Q: DelaySource + 'static,
    H: MessageHandler + 'static,
    S: StatusReader + 'static,
{
    pub fn new(queue: Arc<Q>, handler: Arc<H>, service: Arc<S>) -> Self {
        Self {
            queue,
            handler,
            service,
        }
    }

    /// Run the pool until `token` is cancelled, then join every worker
    /// before returning. No worker outlives this call.
    ///
    /// Workers skip a message when its status cannot be read (the broker
    /// retry lane owns redelivery) and when its status is `cancelled` —
    /// the cancellation enforcement point.
    pub async fn run(
        &self,
        token: CancellationToken,
        strategy: RetryStrategy,
        worker_count: usize,
    ) {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<DispatchMessage>(worker_count * 10);

        let consumer = tokio::spawn({
            let queue = self.queue.clone();
            let token = token.clone();
            async move {
                if let Err(e) = queue.consume(token, tx).await {
                    tracing::error!(error = %e, "Failed to consume messages");
                }
            }
        });

        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            workers.push(tokio::spawn(Self::worker_loop(
                worker_id,
                token.clone(),
                rx.clone(),
                self.service.clone(),
                self.handler.clone(),
                strategy.clone(),
            )));
        }
        // Workers hold the only receiver handles now; once they return the
        // channel closes and the consumer unblocks.
        drop(rx);

        token.cancelled().await;
        for worker in workers {
            let _ = worker.await;
        }
        let _ = consumer.await;
        tracing::info!("Dispatcher stopped");
    }

    async fn worker_loop(
        worker_id: usize,
        token: CancellationToken,
        rx: Arc<Mutex<mpsc::Receiver<DispatchMessage>>>,
        service: Arc<S>,
        handler: Arc<H>,
        strategy: RetryStrategy,
    ) {
        tracing::info!(worker = worker_id, "Worker started");

        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(worker = worker_id, "Worker shutting down");
                    break;
                }
                msg = async { rx.lock().await.recv().await } => match msg {
                    Some(msg) => msg,
                    None => {
                        tracing::info!(worker = worker_id, "Channel closed, worker shutting down");
                        break;
                    }
                }
            };

            let status = match service.status_by_id(&strategy, msg.id).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(
                        worker = worker_id,
                        id = %msg.id,
                        error = %e,
                        "Failed to get notification status, skipping message"
                    );
                    continue;
                }
            };

            if status == NotificationStatus::Cancelled {
                tracing::info!(worker = worker_id, id = %msg.id, "Notification cancelled, skipping");
                continue;
            }

            handler.handle_message(&token, &msg, &strategy).await;
        }
    }
}
