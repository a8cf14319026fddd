//! Configuration module for the order book feed

use serde::Deserialize;
use std::env;

use crate::error::{FeedError, Result};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Price feed endpoint (server-sent events)
    pub feed_url: String,

    /// Reconnection settings
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    /// Upper bound on a single backoff delay, `None` for uncapped
    pub max_reconnect_delay_ms: Option<u64>,

    /// Stream timeouts: response headers, then silence between chunks
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,

    /// Number of price records kept, newest first
    pub history_capacity: usize,

    /// Demo feed server
    pub serve_feed: bool,
    pub feed_bind_addr: String,
    pub feed_interval_ms: u64,
    pub feed_start_price: f64,

    /// Health and metrics port
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let max_reconnect_delay_ms = match env::var("MAX_RECONNECT_DELAY_MS") {
            Ok(raw) => parse_delay_cap(&raw).unwrap_or(defaults.max_reconnect_delay_ms),
            Err(_) => defaults.max_reconnect_delay_ms,
        };

        let config = Self {
            feed_url: env::var("FEED_URL").unwrap_or(defaults.feed_url),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts),
            reconnect_base_delay_ms: env_or("RECONNECT_BASE_DELAY_MS", defaults.reconnect_base_delay_ms),
            max_reconnect_delay_ms,
            connect_timeout_ms: env_or("CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            idle_timeout_ms: env_or("IDLE_TIMEOUT_MS", defaults.idle_timeout_ms),
            history_capacity: env_or("HISTORY_CAPACITY", defaults.history_capacity),
            serve_feed: env_or("SERVE_FEED", defaults.serve_feed),
            feed_bind_addr: env::var("FEED_BIND_ADDR").unwrap_or(defaults.feed_bind_addr),
            feed_interval_ms: env_or("FEED_INTERVAL_MS", defaults.feed_interval_ms),
            feed_start_price: env_or("FEED_START_PRICE", defaults.feed_start_price),
            health_port: env_or("HEALTH_PORT", defaults.health_port),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the feed cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_reconnect_attempts == 0 {
            return Err(FeedError::ConfigError(
                "MAX_RECONNECT_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(FeedError::ConfigError(
                "RECONNECT_BASE_DELAY_MS must be positive".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.idle_timeout_ms == 0 {
            return Err(FeedError::ConfigError(
                "CONNECT_TIMEOUT_MS and IDLE_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(FeedError::ConfigError(
                "HISTORY_CAPACITY must be at least 1".to_string(),
            ));
        }
        if !self.feed_start_price.is_finite() {
            return Err(FeedError::ConfigError(
                "FEED_START_PRICE must be a finite number".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "http://127.0.0.1:3000/api/order-stream".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            max_reconnect_delay_ms: Some(30_000),
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 45_000,
            history_capacity: 20,
            serve_feed: true,
            feed_bind_addr: "127.0.0.1:3000".to_string(),
            feed_interval_ms: 1000,
            feed_start_price: 100.0,
            health_port: 9090,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// `0` and `none` mean uncapped; anything unparseable is `None` here so the
/// caller falls back to the default.
fn parse_delay_cap(raw: &str) -> Option<Option<u64>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    match raw.parse::<u64>() {
        Ok(0) => Some(None),
        Ok(ms) => Some(Some(ms)),
        Err(_) => None,
    }
}
