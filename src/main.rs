//! Fintech platform - account ledger, transfer and payment backend API
//!
//! Uses Event Sourcing with read-model projections, an outbox relay to the
//! event stream, and an external payment gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fintech_platform::config::LogFormat;
use fintech_platform::idempotency::IdempotencyRepository;
use fintech_platform::jobs::{JobScheduler, JobSchedulerConfig};
use fintech_platform::stream::{BroadcastPublisher, EventPublisher, LoggingPublisher, OutboxRelay};
use fintech_platform::{build_router, cache, db, gateway, AppState, Config};

const STREAM_CHANNEL_CAPACITY: usize = 1024;

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fintech_platform=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting fintech platform server");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    if config.is_production() && config.payment_gateway_url.is_none() {
        tracing::warn!("PAYMENT_GATEWAY_URL is not set, payments run against the simulator");
    }

    let account_cache = cache::from_ttl_seconds(config.cache_ttl_seconds);
    let payment_gateway = gateway::from_config(
        config.payment_gateway_url.as_deref(),
        config.payment_gateway_timeout(),
    )?;

    // Event stream: broadcast to in-process subscribers, one of which logs
    let publisher = BroadcastPublisher::new(STREAM_CHANNEL_CAPACITY);
    spawn_stream_logger(&publisher);
    let relay = OutboxRelay::new(pool.clone(), Arc::new(publisher));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = JobScheduler::new(
        IdempotencyRepository::new(pool.clone()),
        relay,
        account_cache.clone(),
    )
    .with_config(JobSchedulerConfig {
        relay_interval: config.stream_poll_interval(),
        ..JobSchedulerConfig::default()
    })
    .start(shutdown_rx);

    let state = AppState::new(pool.clone(), account_cache, payment_gateway, config.limits);
    let app = build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Job scheduler already stopped before shutdown");
    }
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "Job scheduler did not stop cleanly");
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

fn spawn_stream_logger(publisher: &BroadcastPublisher) {
    let mut receiver = publisher.subscribe();
    tokio::spawn(async move {
        let logger = LoggingPublisher;
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let sequence = message.sequence;
                    if let Err(e) = logger.publish(message).await {
                        tracing::warn!(sequence, error = %e, "Stream logger failed to publish");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Stream logger lagged behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
