//! Prometheus metrics for the feed

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{FeedError, Result};
use crate::stream::ConnectionState;

/// Counters and gauges updated by the feed driver
#[derive(Clone)]
pub struct FeedMetrics {
    pub samples_accepted: IntCounter,
    pub payloads_discarded: IntCounter,
    pub connection_attempts: IntCounter,
    pub reconnects_scheduled: IntCounter,
    pub connection_state: IntGauge,
    pub last_price: Gauge,
}

impl FeedMetrics {
    /// Create and register the feed metrics on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            samples_accepted: IntCounter::with_opts(Opts::new(
                "orderbook_samples_accepted_total",
                "Price samples accepted into the history",
            ))
            .map_err(metrics_error)?,
            payloads_discarded: IntCounter::with_opts(Opts::new(
                "orderbook_payloads_discarded_total",
                "Stream payloads dropped as malformed",
            ))
            .map_err(metrics_error)?,
            connection_attempts: IntCounter::with_opts(Opts::new(
                "orderbook_connection_attempts_total",
                "Stream connections opened",
            ))
            .map_err(metrics_error)?,
            reconnects_scheduled: IntCounter::with_opts(Opts::new(
                "orderbook_reconnects_scheduled_total",
                "Reconnect timers scheduled after a failure",
            ))
            .map_err(metrics_error)?,
            connection_state: IntGauge::with_opts(Opts::new(
                "orderbook_connection_state",
                "0 connecting, 1 open, 2 reconnecting, 3 failed",
            ))
            .map_err(metrics_error)?,
            last_price: Gauge::with_opts(Opts::new(
                "orderbook_last_price",
                "Most recently accepted price",
            ))
            .map_err(metrics_error)?,
        };

        registry
            .register(Box::new(metrics.samples_accepted.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.payloads_discarded.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.connection_attempts.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.reconnects_scheduled.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.connection_state.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(metrics.last_price.clone()))
            .map_err(metrics_error)?;

        Ok(metrics)
    }

    pub fn set_state(&self, state: ConnectionState) {
        let code = match state {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Failed => 3,
        };
        self.connection_state.set(code);
    }
}

/// Prometheus text exposition of everything in `registry`
pub fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(metrics_error)?;
    String::from_utf8(buffer).map_err(|e| FeedError::ServerError(e.to_string()))
}

fn metrics_error(err: prometheus::Error) -> FeedError {
    FeedError::ServerError(format!("metrics: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let registry = Registry::new();
        let metrics = FeedMetrics::new(&registry).unwrap();
        metrics.samples_accepted.inc();
        metrics.set_state(ConnectionState::Reconnecting);

        let text = render(&registry).unwrap();
        assert!(text.contains("orderbook_samples_accepted_total 1"));
        assert!(text.contains("orderbook_connection_state 2"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        FeedMetrics::new(&registry).unwrap();
        assert!(FeedMetrics::new(&registry).is_err());
    }
}
