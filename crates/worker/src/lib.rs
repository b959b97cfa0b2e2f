//! Delivery workers.
//!
//! The concurrency core of the pipeline: [`Dispatcher`] drains the delay
//! queue into a fixed-size worker set, each worker re-checks cancellation
//! against live status before handing the message to [`SendHandler`], which
//! runs the bounded-backoff delivery attempt and reports the terminal
//! status. Channel adapters for Telegram and email live in [`channels`].

pub mod channels;
pub mod handler;
pub mod pool;

pub use channels::{EmailNotifier, TelegramNotifier};
pub use handler::{DeliveryService, MessageHandler, SendHandler};
pub use pool::{Dispatcher, StatusReader};
