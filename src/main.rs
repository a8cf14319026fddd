//! Order book price feed
//!
//! Runs the demo price stream (optional), subscribes to it with automatic
//! reconnection, and logs the live ticker.

use std::net::SocketAddr;
use std::time::Duration;

use prometheus::Registry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderbook_stream::server::{self, FeedSettings};
use orderbook_stream::{
    Config, FeedError, FeedHandle, FeedMetrics, FeedSnapshot, OrderBookFeed, SseStreamFactory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting order book price feed");

    let config = Config::load()?;
    info!(
        feed_url = %config.feed_url,
        max_attempts = config.max_reconnect_attempts,
        max_delay_ms = ?config.max_reconnect_delay_ms,
        idle_timeout_ms = config.idle_timeout_ms,
        "Configuration loaded"
    );

    let servers = CancellationToken::new();
    let registry = Registry::new();
    let metrics = FeedMetrics::new(&registry)?;

    if config.serve_feed {
        let listener = TcpListener::bind(&config.feed_bind_addr).await?;
        let router = server::feed_router(FeedSettings {
            interval: Duration::from_millis(config.feed_interval_ms),
            start_price: config.feed_start_price,
        });
        let token = servers.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(listener, router, token).await {
                warn!(error = %e, "Feed server error");
            }
        });
    }

    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let health_listener = TcpListener::bind(health_addr).await?;
    let health_token = servers.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve(health_listener, server::health_router(registry), health_token).await {
            warn!(error = %e, "Health server error");
        }
    });

    let factory = SseStreamFactory::from_config(&config);
    let feed = OrderBookFeed::new(&config, factory, StdRng::from_entropy()).with_metrics(metrics);
    let handle = FeedHandle::spawn(feed);
    tokio::spawn(log_ticker(handle.subscribe()));

    let feed_token = handle.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            feed_token.cancel();
        }
    });

    let result = handle.join().await;
    servers.cancel();

    match result {
        Ok(()) => {
            info!("Price feed stopped");
            Ok(())
        }
        Err(e @ FeedError::MaxReconnectAttemptsExceeded { .. }) => {
            error!(error = %e, "Price feed unavailable");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stand-in renderer: one log line per published view
async fn log_ticker(mut snapshots: watch::Receiver<FeedSnapshot>) {
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let status = snapshot.status_line();

        match (snapshot.history.first(), snapshot.watermarks) {
            (Some(latest), Some(marks)) => info!(
                status = %status,
                price = latest.price,
                direction = ?latest.direction,
                side = ?latest.side,
                time = %latest.timestamp,
                high = marks.high,
                low = marks.low,
                rows = snapshot.history.len(),
                "Ticker"
            ),
            _ => info!(status = %status, "Ticker"),
        }
    }
}
