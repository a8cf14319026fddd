//! Parser module for the price feed
//!
//! Handles server-sent-event framing of the raw byte stream and decoding of
//! the `{"price": <number>}` payload carried by each event.

use bytes::{Buf, BytesMut};
use serde::Deserialize;

use crate::error::{FeedError, Result};

/// Longest line the decoder buffers before giving up on the stream
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Raw price payload decoded from one stream event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub price: f64,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    price: Option<serde_json::Value>,
}

impl PriceSample {
    /// Parse an event payload.
    ///
    /// Fails on malformed JSON, a missing price, a non-numeric price, or a
    /// price that is not finite.
    pub fn parse(raw: &str) -> Result<Self> {
        let sample: RawSample = serde_json::from_str(raw)?;

        let value = sample.price.ok_or(FeedError::MissingPrice)?;
        let price = value
            .as_f64()
            .ok_or_else(|| FeedError::InvalidPrice(value.to_string()))?;

        if !price.is_finite() {
            return Err(FeedError::InvalidPrice(price.to_string()));
        }

        Ok(Self { price })
    }
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes may arrive split at arbitrary points; incomplete lines and events
/// stay buffered until the rest arrives. Only bytes not yet searched for a
/// line terminator are scanned on each push.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    scanned: usize,
    max_line: usize,
    data_lines: Vec<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line,
            data_lines: Vec::new(),
        }
    }

    /// Feed a chunk and return the data of every event it completes.
    ///
    /// Fails once an unterminated line grows past the line limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            self.scanned = 0;

            let mut line = String::from_utf8_lossy(&line).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }

            if let Some(data) = self.process_line(&line) {
                events.push(data);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            return Err(FeedError::Transport(format!(
                "SSE line exceeds {} bytes",
                self.max_line
            )));
        }

        Ok(events)
    }

    /// Bytes still waiting for a line terminator
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keepalive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        // `event`, `id` and `retry` carry nothing the feed uses
        if field == "data" {
            self.data_lines.push(value.to_string());
        }

        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();

        if data.is_empty() {
            None
        } else {
            Some(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_sample() {
        let sample = PriceSample::parse(r#"{"price": 100.25}"#).unwrap();
        assert_eq!(sample.price, 100.25);

        let sample = PriceSample::parse(r#"{"price": 42, "extra": "ignored"}"#).unwrap();
        assert_eq!(sample.price, 42.0);
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        assert!(matches!(
            PriceSample::parse("not json"),
            Err(FeedError::ParseError(_))
        ));
        assert!(matches!(
            PriceSample::parse(r#"{"bid": 1.0}"#),
            Err(FeedError::MissingPrice)
        ));
        assert!(matches!(
            PriceSample::parse(r#"{"price": "100.5"}"#),
            Err(FeedError::InvalidPrice(_))
        ));
        assert!(matches!(
            PriceSample::parse(r#"{"price": null}"#),
            Err(FeedError::MissingPrice)
        ));
        assert!(PriceSample::parse("42").is_err());
    }

    #[test]
    fn test_decoder_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"price\": 100.5}\n\n").unwrap();
        assert_eq!(events, vec![r#"{"price": 100.5}"#.to_string()]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn test_decoder_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"pri").unwrap().is_empty());
        assert!(decoder.push(b"ce\": 99}\r\n").unwrap().is_empty());
        let events = decoder.push(b"\r\ndata: {\"price\": 98}\n\n").unwrap();
        assert_eq!(
            events,
            vec![r#"{"price": 99}"#.to_string(), r#"{"price": 98}"#.to_string()]
        );
    }

    #[test]
    fn test_decoder_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b": keepalive\n\nevent: tick\nid: 7\nretry: 3000\n\n")
            .unwrap();
        assert!(events.is_empty());

        let events = decoder
            .push(b"event: tick\ndata: first\ndata: second\n\n")
            .unwrap();
        assert_eq!(events, vec!["first\nsecond".to_string()]);
    }

    #[test]
    fn test_decoder_line_built_byte_by_byte() {
        let mut decoder = SseDecoder::new();
        let frame = b"data: {\"price\": 7}\n";
        for byte in frame.iter() {
            assert!(decoder.push(&[*byte]).unwrap().is_empty());
        }
        assert_eq!(decoder.pending_bytes(), 0);

        let events = decoder.push(b"\n").unwrap();
        assert_eq!(events, vec![r#"{"price": 7}"#.to_string()]);
    }

    #[test]
    fn test_decoder_rejects_oversized_line() {
        let mut decoder = SseDecoder::with_max_line(16);
        assert!(decoder.push(b"data: 0123456789").is_ok());
        assert!(matches!(
            decoder.push(b"abc"),
            Err(FeedError::Transport(_))
        ));
    }

    #[test]
    fn test_decoder_limit_applies_per_line() {
        let mut decoder = SseDecoder::with_max_line(16);
        let events = decoder.push(b"data: 1\n\ndata: 2\n\ndata: 3\n\n").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(decoder.pending_bytes(), 0);
    }
}
