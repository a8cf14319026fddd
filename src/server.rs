//! Demo price feed and health endpoints
//!
//! `GET /api/order-stream` pushes a random-walk price as a server-sent event
//! at a fixed cadence. `/health` and `/metrics` report on the process.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use prometheus::Registry;
use rand::Rng;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::Result;
use crate::metrics;
use crate::stream::ORDER_STREAM_PATH;

/// Random walk parameters
#[derive(Debug, Clone, Copy)]
pub struct FeedSettings {
    pub interval: Duration,
    pub start_price: f64,
}

#[derive(Debug, Serialize)]
struct PricePayload {
    price: f64,
}

/// Router serving the price stream
pub fn feed_router(settings: FeedSettings) -> Router {
    Router::new()
        .route(ORDER_STREAM_PATH, get(order_stream))
        .with_state(settings)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Router serving health and metrics
pub fn health_router(registry: Registry) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .with_state(Arc::new(registry))
}

/// Serve `router` until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Starting HTTP server");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn order_stream(
    State(settings): State<FeedSettings>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    debug!("Price stream client connected");

    // First price goes out immediately, then one per interval. The walk
    // stops when the client disconnects and the stream is dropped.
    let prices = stream::unfold((settings.start_price, true), move |(price, first)| async move {
        if !first {
            tokio::time::sleep(settings.interval).await;
        }
        let step: f64 = rand::thread_rng().gen_range(-0.5..0.5);
        let next = price + step;
        let event = Event::default().json_data(PricePayload { price: next });
        Some((event, (next, false)))
    });

    Sse::new(prices).keep_alive(KeepAlive::default())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "orderbook-stream",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_text(
    State(registry): State<Arc<Registry>>,
) -> std::result::Result<String, (StatusCode, String)> {
    metrics::render(&registry).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
