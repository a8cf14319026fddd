//! Price feed stream client
//!
//! Opens one server-sent-event subscription per handle and surfaces it as a
//! channel of ready / data / failure notifications.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Url};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::parser::SseDecoder;

/// Notification from one stream subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Handshake succeeded
    Ready,
    /// Raw data payload of one event
    Data(String),
    /// Transport error or stream end
    Failure(String),
}

/// Produces stream handles; injected into the feed instead of a global
/// constructor.
pub trait StreamFactory: Send + Sync + 'static {
    /// Open a subscription. An `Err` counts as a failed attempt.
    fn open(&self, url: &str) -> Result<StreamHandle>;
}

/// One live subscription
#[derive(Debug)]
pub struct StreamHandle {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl StreamHandle {
    /// Handle fed by whoever holds the sender
    pub fn channel() -> (mpsc::UnboundedSender<StreamEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, None))
    }

    /// Handle fed by `task`, which is aborted on close
    pub fn new(events: mpsc::UnboundedReceiver<StreamEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            events,
            task,
            closed: false,
        }
    }

    /// Next notification; `None` once closed or the producer is gone
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Release the transport. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Server-sent-event transport over reqwest
#[derive(Debug, Clone)]
pub struct SseStreamFactory {
    client: Client,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl Default for SseStreamFactory {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SseStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory using the configured handshake and idle timeouts
    pub fn from_config(config: &Config) -> Self {
        Self::with_client(Client::new()).with_timeouts(
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.idle_timeout_ms),
        )
    }

    pub fn with_client(client: Client) -> Self {
        let defaults = Config::default();
        Self {
            client,
            connect_timeout: Duration::from_millis(defaults.connect_timeout_ms),
            idle_timeout: Duration::from_millis(defaults.idle_timeout_ms),
        }
    }

    /// `connect` bounds the wait for response headers, `idle` the silence
    /// between body chunks. Keepalive comments count as traffic.
    pub fn with_timeouts(mut self, connect: Duration, idle: Duration) -> Self {
        self.connect_timeout = connect;
        self.idle_timeout = idle;
        self
    }
}

impl StreamFactory for SseStreamFactory {
    fn open(&self, url: &str) -> Result<StreamHandle> {
        let url = Url::parse(url)
            .map_err(|e| FeedError::Connection(format!("Invalid feed URL {}: {}", url, e)))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FeedError::Connection(format!("No runtime to drive the stream: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(pump(
            self.client.clone(),
            url,
            self.connect_timeout,
            self.idle_timeout,
            tx,
        ));

        Ok(StreamHandle::new(rx, Some(task)))
    }
}

/// Read the event stream into `tx` until it fails, ends, or goes quiet
async fn pump(
    client: Client,
    url: Url,
    connect_timeout: Duration,
    idle_timeout: Duration,
    tx: mpsc::UnboundedSender<StreamEvent>,
) {
    info!(url = %url, "Opening price stream");

    let request = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send();

    let response = match timeout(connect_timeout, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let _ = tx.send(StreamEvent::Failure(format!("Failed to connect: {}", e)));
            return;
        }
        Err(_) => {
            warn!(timeout_ms = millis(connect_timeout), "Price stream handshake timed out");
            let _ = tx.send(StreamEvent::Failure(format!(
                "Handshake timed out after {} ms",
                millis(connect_timeout)
            )));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let _ = tx.send(StreamEvent::Failure(format!("Unexpected status {}", status)));
        return;
    }

    debug!(status = ?status, "Price stream handshake complete");
    if tx.send(StreamEvent::Ready).is_err() {
        return;
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = match timeout(idle_timeout, body.next()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(_) => {
                // Half-open connection or a server that stopped talking
                warn!(timeout_ms = millis(idle_timeout), "Price stream went silent");
                let _ = tx.send(StreamEvent::Failure(format!(
                    "No data within idle timeout of {} ms",
                    millis(idle_timeout)
                )));
                return;
            }
        };

        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Price stream read error");
                let _ = tx.send(StreamEvent::Failure(e.to_string()));
                return;
            }
        };

        let events = match decoder.push(&bytes) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Price stream framing error");
                let _ = tx.send(StreamEvent::Failure(e.to_string()));
                return;
            }
        };

        for data in events {
            if tx.send(StreamEvent::Data(data)).is_err() {
                // Handle closed
                return;
            }
        }
    }

    let _ = tx.send(StreamEvent::Failure("Stream ended".to_string()));
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const SSE_HEADERS: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";

    /// Accept one connection, read the request, then hand the socket to `script`
    async fn scripted_server<F, Fut>(script: F) -> String
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            script(socket).await;
        });
        format!("http://{}/api/order-stream", addr)
    }

    async fn next_within(handle: &mut StreamHandle, secs: u64) -> Option<StreamEvent> {
        tokio::time::timeout(Duration::from_secs(secs), handle.next_event())
            .await
            .expect("stream produced no event in time")
    }

    #[tokio::test]
    async fn test_channel_handle_delivers_in_order() {
        let (tx, mut handle) = StreamHandle::channel();
        tx.send(StreamEvent::Ready).unwrap();
        tx.send(StreamEvent::Data("{}".to_string())).unwrap();

        assert_eq!(handle.next_event().await, Some(StreamEvent::Ready));
        assert_eq!(handle.next_event().await, Some(StreamEvent::Data("{}".to_string())));

        drop(tx);
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, mut handle) = StreamHandle::channel();
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert!(tx.send(StreamEvent::Ready).is_err());
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_invalid_url_is_construction_failure() {
        let factory = SseStreamFactory::new();
        assert!(matches!(
            factory.open("not a url"),
            Err(FeedError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_failure() {
        // Port 9 (discard) on loopback is not expected to accept HTTP
        let factory = SseStreamFactory::new();
        let mut handle = factory.open("http://127.0.0.1:9/api/order-stream").unwrap();
        assert!(matches!(handle.next_event().await, Some(StreamEvent::Failure(_))));
    }

    #[tokio::test]
    async fn test_silent_stream_fails_after_idle_timeout() {
        let url = scripted_server(|mut socket| async move {
            socket.write_all(SSE_HEADERS).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;

        let factory = SseStreamFactory::new()
            .with_timeouts(Duration::from_secs(5), Duration::from_millis(200));
        let mut handle = factory.open(&url).unwrap();

        assert_eq!(next_within(&mut handle, 5).await, Some(StreamEvent::Ready));
        match next_within(&mut handle, 5).await {
            Some(StreamEvent::Failure(reason)) => assert!(reason.contains("idle")),
            other => panic!("expected idle failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keepalive_comments_reset_idle_timeout() {
        let url = scripted_server(|mut socket| async move {
            socket.write_all(SSE_HEADERS).await.unwrap();
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                socket.write_all(b":\n\n").await.unwrap();
            }
            socket.write_all(b"data: {\"price\": 101.5}\n\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;

        let factory = SseStreamFactory::new()
            .with_timeouts(Duration::from_secs(5), Duration::from_millis(250));
        let mut handle = factory.open(&url).unwrap();

        assert_eq!(next_within(&mut handle, 5).await, Some(StreamEvent::Ready));
        assert_eq!(
            next_within(&mut handle, 5).await,
            Some(StreamEvent::Data(r#"{"price": 101.5}"#.to_string()))
        );
    }

    #[tokio::test]
    async fn test_unanswered_request_fails_after_connect_timeout() {
        let url = scripted_server(|socket| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        })
        .await;

        let factory = SseStreamFactory::new()
            .with_timeouts(Duration::from_millis(200), Duration::from_secs(5));
        let mut handle = factory.open(&url).unwrap();

        match next_within(&mut handle, 5).await {
            Some(StreamEvent::Failure(reason)) => assert!(reason.contains("Handshake")),
            other => panic!("expected handshake failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_line_fails_stream() {
        let url = scripted_server(|mut socket| async move {
            socket.write_all(SSE_HEADERS).await.unwrap();
            let line = vec![b'x'; crate::parser::MAX_LINE_BYTES + 1];
            let _ = socket.write_all(b"data: ").await;
            let _ = socket.write_all(&line).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;

        let factory = SseStreamFactory::new();
        let mut handle = factory.open(&url).unwrap();

        assert_eq!(next_within(&mut handle, 5).await, Some(StreamEvent::Ready));
        match next_within(&mut handle, 5).await {
            Some(StreamEvent::Failure(reason)) => assert!(reason.contains("exceeds")),
            other => panic!("expected framing failure, got {:?}", other),
        }
    }
}
