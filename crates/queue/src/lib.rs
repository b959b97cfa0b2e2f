//! Broker-backed delay queue.
//!
//! Delivers a [`DispatchMessage`] to consumers no earlier than its `send_at`
//! time, using a delay-capable exchange (`x-delayed-message`) and a
//! per-message `x-delay` header. Topology, declared once at startup and
//! idempotent:
//!
//! - the delayed exchange routes published messages after the header delay
//! - the main queue is bound to it and dead-letters to the DLQ
//! - the retry queue holds messages for a fixed TTL, then dead-letters them
//!   back to the main queue (broker-level second-chance lane)
//! - the DLQ is the operator-inspectable final resting place
//!
//! The in-process backoff loop in the worker is the authoritative retry
//! mechanism; deliveries are acknowledged once handed off, so the retry and
//! dead-letter lanes sit idle unless an operator routes messages through
//! them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::retry::{RetryStrategy, retry};
use herald_common::types::DispatchMessage;

/// How long the retry queue holds a message before dead-lettering it back
/// to the main queue.
const RETRY_TTL_MS: i32 = 5000;

/// Unacknowledged deliveries the broker keeps in flight per consumer.
const PREFETCH_COUNT: u16 = 64;

/// Publishing capability consumed by the dispatch service.
#[async_trait]
pub trait DelayPublisher: Send + Sync {
    /// Serialize and publish a message for delivery at its `send_at` time,
    /// retrying the publish call itself per `strategy`.
    async fn publish(&self, msg: &DispatchMessage, strategy: &RetryStrategy)
    -> Result<(), AppError>;
}

/// Consuming capability drained by the worker pool.
#[async_trait]
pub trait DelaySource: Send + Sync {
    /// Receive deliveries into `out` until the token is cancelled or the
    /// subscription ends. Malformed payloads are logged and dropped.
    async fn consume(
        &self,
        token: CancellationToken,
        out: mpsc::Sender<DispatchMessage>,
    ) -> Result<(), AppError>;
}

/// Delay until `send_at`, in whole milliseconds, clamped at zero for
/// past-due messages.
fn delay_ms(send_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (send_at - now).num_milliseconds().max(0)
}

/// lapin-backed delay queue bound to one broker channel.
#[derive(Clone)]
pub struct DelayQueue {
    channel: Channel,
    exchange: String,
    queue: String,
    routing_key: String,
}

impl DelayQueue {
    /// Declare the full topology on `channel` and return a handle to it.
    ///
    /// All declarations are idempotent; re-running them against an existing
    /// topology is a no-op.
    pub async fn declare(channel: Channel, config: &AppConfig) -> Result<Self, AppError> {
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        // Delayed exchange: routing happens `x-delay` ms after publish.
        let mut exchange_args = FieldTable::default();
        exchange_args.insert(
            "x-delayed-type".into(),
            AMQPValue::LongString("direct".to_string().into()),
        );
        channel
            .exchange_declare(
                &config.amqp_exchange,
                ExchangeKind::Custom("x-delayed-message".to_string()),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                exchange_args,
            )
            .await?;

        channel
            .queue_declare(
                &config.amqp_dlq,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        // Retry queue: held for RETRY_TTL_MS, then dead-lettered back to
        // the main queue through the default exchange.
        let mut retry_args = FieldTable::default();
        retry_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(String::new().into()),
        );
        retry_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(config.amqp_queue.clone().into()),
        );
        retry_args.insert("x-message-ttl".into(), AMQPValue::LongInt(RETRY_TTL_MS));
        channel
            .queue_declare(
                &config.amqp_retry_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                retry_args,
            )
            .await?;

        // Main queue: rejected messages dead-letter to the DLQ.
        let mut main_args = FieldTable::default();
        main_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(String::new().into()),
        );
        main_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(config.amqp_dlq.clone().into()),
        );
        channel
            .queue_declare(
                &config.amqp_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                main_args,
            )
            .await?;

        channel
            .queue_bind(
                &config.amqp_queue,
                &config.amqp_exchange,
                &config.amqp_routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            exchange = %config.amqp_exchange,
            queue = %config.amqp_queue,
            retry_queue = %config.amqp_retry_queue,
            dlq = %config.amqp_dlq,
            "Delay queue topology declared"
        );

        Ok(Self {
            channel,
            exchange: config.amqp_exchange.clone(),
            queue: config.amqp_queue.clone(),
            routing_key: config.amqp_routing_key.clone(),
        })
    }
}

#[async_trait]
impl DelayPublisher for DelayQueue {
    async fn publish(
        &self,
        msg: &DispatchMessage,
        strategy: &RetryStrategy,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(msg)
            .map_err(|e| AppError::Publish(format!("serialize message {}: {e}", msg.id)))?;

        let delay = delay_ms(msg.send_at, Utc::now());
        let mut headers = FieldTable::default();
        headers.insert("x-delay".into(), AMQPValue::LongLongInt(delay));

        tracing::debug!(id = %msg.id, delay_ms = delay, "Publishing dispatch message");

        retry(strategy, || async {
            let confirm = self
                .channel
                .basic_publish(
                    &self.exchange,
                    &self.routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default()
                        .with_delivery_mode(2) // persistent
                        .with_content_type("application/json".into())
                        .with_headers(headers.clone()),
                )
                .await?;
            confirm.await?;
            Ok::<(), lapin::Error>(())
        })
        .await
        .map_err(|e| AppError::Publish(format!("publish message {}: {e}", msg.id)))
    }
}

#[async_trait]
impl DelaySource for DelayQueue {
    async fn consume(
        &self,
        token: CancellationToken,
        out: mpsc::Sender<DispatchMessage>,
    ) -> Result<(), AppError> {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.queue,
                "herald-dispatcher",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Stopped consuming messages");
                    break;
                }
                delivery = consumer.next() => {
                    let Some(delivery) = delivery else {
                        tracing::info!("Broker subscription ended");
                        break;
                    };

                    let delivery = match delivery {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to receive delivery");
                            break;
                        }
                    };

                    match serde_json::from_slice::<DispatchMessage>(&delivery.data) {
                        Ok(msg) => {
                            // Handoff before ack: a crash here redelivers
                            // rather than losing the message.
                            if out.send(msg).await.is_err() {
                                tracing::warn!("Output channel closed, stopping consumer");
                                break;
                            }
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                tracing::error!(error = %e, "Failed to ack delivery");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Dropping malformed queue payload");
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                tracing::error!(error = %e, "Failed to ack malformed delivery");
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_for_future_send_at() {
        let now: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        let send_at = now + chrono::Duration::seconds(90);
        assert_eq!(delay_ms(send_at, now), 90_000);
    }

    #[test]
    fn test_delay_clamped_for_past_send_at() {
        let now: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        let send_at = now - chrono::Duration::seconds(30);
        assert_eq!(delay_ms(send_at, now), 0);
    }

    #[test]
    fn test_delay_zero_for_immediate_send_at() {
        let now: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        assert_eq!(delay_ms(now, now), 0);
    }
}
