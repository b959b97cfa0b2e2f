//! Herald API server binary entrypoint.
//!
//! Hosts both the HTTP layer and the dispatch worker pool in one process:
//! notifications created over HTTP land in the store and the delay queue,
//! and the pool in the background drains deliveries as they come due.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use lapin::{Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::create_pool;
use herald_common::redis_pool::create_redis_pool;
use herald_dispatch::{DispatchService, Notifier, RedisStatusCache};
use herald_queue::DelayQueue;
use herald_store::PgNotificationStore;
use herald_worker::{Dispatcher, EmailNotifier, SendHandler, TelegramNotifier};

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_api=debug,herald_worker=debug,herald_dispatch=debug,herald_queue=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect the backing services; failures here are fatal.
    let pool = create_pool(&config).await?;
    let redis = create_redis_pool(&config.redis_url).await?;

    let amqp = Connection::connect(&config.amqp_url, ConnectionProperties::default()).await?;
    let channel = amqp.create_channel().await?;
    let queue = DelayQueue::declare(channel, &config).await?;
    tracing::info!("Connected to RabbitMQ");

    // Register delivery channels present in the configuration.
    let mut notifiers: HashMap<String, Arc<dyn Notifier>> = HashMap::new();
    if let Some(token) = config.telegram_bot_token.clone() {
        notifiers.insert("telegram".to_string(), Arc::new(TelegramNotifier::new(token)));
    }
    if let (Some(api_key), Some(from)) = (config.resend_api_key.clone(), config.email_from.clone())
    {
        notifiers.insert(
            "email".to_string(),
            Arc::new(EmailNotifier::new(api_key, from)),
        );
    }
    if notifiers.is_empty() {
        tracing::warn!("No delivery channels configured; every send will fail");
    }

    let service = Arc::new(DispatchService::new(
        PgNotificationStore::new(pool),
        RedisStatusCache::new(redis),
        queue.clone(),
        notifiers,
    ));

    // Start the worker pool
    let token = CancellationToken::new();
    let dispatcher_task = tokio::spawn({
        let token = token.clone();
        let strategy = config.retry_strategy();
        let worker_count = config.worker_count;
        let dispatcher = Dispatcher::new(
            Arc::new(queue),
            Arc::new(SendHandler::new(service.clone())),
            service.clone(),
        );
        async move { dispatcher.run(token, strategy, worker_count).await }
    });

    // Build router
    let state = AppState::new(service, config.clone());
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Server drained; stop the pool and wait for every worker to return.
    tracing::info!("Shutdown signal received, stopping dispatcher");
    token.cancel();
    dispatcher_task.await?;
    tracing::info!("Herald stopped");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
