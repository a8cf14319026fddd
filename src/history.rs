//! Price history reducer
//!
//! Derives direction, side and running high/low watermarks from a stream of
//! scalar prices and keeps the most recent records, newest first.

use chrono::NaiveTime;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Records kept when no capacity is configured
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Move relative to the previous accepted price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Same,
}

/// Cosmetic side of a record, derived from its direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Ask on an uptick, bid on a downtick, a coin flip when flat
    pub fn for_direction<R: Rng + ?Sized>(direction: Direction, rng: &mut R) -> Self {
        match direction {
            Direction::Up => Side::Ask,
            Direction::Down => Side::Bid,
            Direction::Same => {
                if rng.gen_bool(0.5) {
                    Side::Bid
                } else {
                    Side::Ask
                }
            }
        }
    }
}

/// One accepted price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub price: f64,
    /// Local time of day the price was accepted
    pub timestamp: String,
    pub side: Side,
    pub direction: Direction,
}

/// Running extrema since the history was created
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Watermarks {
    pub high: f64,
    pub low: f64,
}

impl Watermarks {
    /// Fold a price in; `None` means no samples yet
    pub fn extend(previous: Option<Watermarks>, price: f64) -> Self {
        match previous {
            Some(marks) => Self {
                high: marks.high.max(price),
                low: marks.low.min(price),
            },
            None => Self {
                high: price,
                low: price,
            },
        }
    }
}

/// Bounded price history, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    records: VecDeque<PriceRecord>,
    capacity: usize,
    watermarks: Option<Watermarks>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
            watermarks: None,
        }
    }

    /// Compute the record for `price` accepted at `at`, and the history and
    /// watermarks that result, leaving `self` untouched.
    ///
    /// Callers guarantee `price` is finite.
    pub fn update<R: Rng + ?Sized>(
        &self,
        price: f64,
        at: NaiveTime,
        rng: &mut R,
    ) -> (PriceRecord, PriceHistory, Watermarks) {
        let mut next = self.clone();
        let record = next.apply(price, at, rng).clone();
        let watermarks = Watermarks::extend(self.watermarks, price);
        (record, next, watermarks)
    }

    /// In-place form of [`PriceHistory::update`]
    pub fn apply<R: Rng + ?Sized>(&mut self, price: f64, at: NaiveTime, rng: &mut R) -> &PriceRecord {
        let direction = match self.records.front() {
            Some(prev) if price > prev.price => Direction::Up,
            Some(prev) if price < prev.price => Direction::Down,
            _ => Direction::Same,
        };

        let record = PriceRecord {
            price,
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            side: Side::for_direction(direction, rng),
            direction,
        };

        self.records.push_front(record);
        self.records.truncate(self.capacity);
        self.watermarks = Some(Watermarks::extend(self.watermarks, price));

        &self.records[0]
    }

    /// Records, newest first
    pub fn records(&self) -> impl Iterator<Item = &PriceRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<PriceRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&PriceRecord> {
        self.records.front()
    }

    pub fn watermarks(&self) -> Option<Watermarks> {
        self.watermarks
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PriceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
