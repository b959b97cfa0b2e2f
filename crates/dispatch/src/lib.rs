//! Notification lifecycle orchestration.
//!
//! [`DispatchService`] is the single transition point for notification
//! status, mediating between the durable store and the lossy status cache,
//! and the only component that resolves delivery channels.

pub mod cache;
pub mod service;

pub use cache::{RedisStatusCache, StatusCache};
pub use service::{DispatchService, Notifier};
