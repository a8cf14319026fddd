//! Stream module for price feed connection management

mod client;
mod manager;

pub use client::{SseStreamFactory, StreamEvent, StreamFactory, StreamHandle};
pub use manager::{FeedHandle, OrderBookFeed};

use serde::{Deserialize, Serialize};

use crate::history::{PriceRecord, Watermarks};

/// Well-known path of the price feed
pub const ORDER_STREAM_PATH: &str = "/api/order-stream";

/// Lifecycle of the feed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

/// Read-only view handed to the renderer after every transition or
/// accepted price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Newest first
    pub history: Vec<PriceRecord>,
    pub watermarks: Option<Watermarks>,
}

impl FeedSnapshot {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt_count: 0,
            max_attempts,
            history: Vec::new(),
            watermarks: None,
        }
    }

    pub fn last_price(&self) -> Option<f64> {
        self.history.first().map(|record| record.price)
    }

    /// Short connection indicator, e.g. `reconnecting (2/5)`
    pub fn status_line(&self) -> String {
        match self.state {
            ConnectionState::Connecting => "connecting".to_string(),
            ConnectionState::Open => "live".to_string(),
            ConnectionState::Reconnecting => {
                format!("reconnecting ({}/{})", self.attempt_count, self.max_attempts)
            }
            ConnectionState::Failed => format!(
                "connection failed after {} attempts",
                self.attempt_count
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let mut snapshot = FeedSnapshot::new(5);
        assert_eq!(snapshot.status_line(), "connecting");

        snapshot.state = ConnectionState::Reconnecting;
        snapshot.attempt_count = 2;
        assert_eq!(snapshot.status_line(), "reconnecting (2/5)");

        snapshot.state = ConnectionState::Failed;
        snapshot.attempt_count = 5;
        assert_eq!(snapshot.status_line(), "connection failed after 5 attempts");
    }
}
