//! Order book price feed library
//!
//! Subscribes to a server-sent-event price feed, reconnects with exponential
//! backoff when the stream drops, and derives a bounded, newest-first price
//! history with trade direction, side and high/low watermarks.

pub mod config;
pub mod error;
pub mod history;
pub mod metrics;
pub mod parser;
pub mod reconnect;
pub mod server;
pub mod stream;

pub use config::Config;
pub use error::{FeedError, Result};
pub use history::{Direction, PriceHistory, PriceRecord, Side, Watermarks};
pub use metrics::FeedMetrics;
pub use parser::{PriceSample, SseDecoder};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use stream::{
    ConnectionState, FeedHandle, FeedSnapshot, OrderBookFeed, SseStreamFactory, StreamEvent,
    StreamFactory, StreamHandle,
};
