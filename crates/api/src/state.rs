//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_dispatch::{DispatchService, RedisStatusCache};
use herald_queue::DelayQueue;
use herald_store::PgNotificationStore;

/// The fully wired dispatch service used by the running binary.
pub type NotificationService = DispatchService<PgNotificationStore, RedisStatusCache, DelayQueue>;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NotificationService>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(service: Arc<NotificationService>, config: AppConfig) -> Self {
        Self { service, config }
    }
}
