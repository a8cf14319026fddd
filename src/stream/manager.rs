//! Feed connection manager
//!
//! Owns the single live stream handle and the single pending reconnect
//! timer, applies the reconnect policy on failure and feeds accepted prices
//! into the history. Every input is handled on one task, in arrival order.

use std::time::Duration;

use chrono::Local;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionState, FeedSnapshot, StreamEvent, StreamFactory, StreamHandle};
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::history::PriceHistory;
use crate::metrics::FeedMetrics;
use crate::parser::PriceSample;
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};

/// Reconnect timer waiting to fire, tagged with the stream generation that
/// failed
struct PendingReconnect {
    generation: u64,
    task: JoinHandle<()>,
}

/// Live price feed for one mount
pub struct OrderBookFeed<F, R> {
    url: String,
    factory: F,
    policy: ReconnectPolicy,
    state: ConnectionState,
    history: PriceHistory,
    rng: R,
    /// Incremented on every connection attempt
    generation: u64,
    active: Option<StreamHandle>,
    pending: Option<PendingReconnect>,
    timer_tx: mpsc::UnboundedSender<u64>,
    timer_rx: mpsc::UnboundedReceiver<u64>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    metrics: Option<FeedMetrics>,
}

impl<F, R> OrderBookFeed<F, R>
where
    F: StreamFactory,
    R: Rng + Send,
{
    /// Create a feed. Nothing is opened until [`OrderBookFeed::mount`] or
    /// [`OrderBookFeed::run`].
    pub fn new(config: &Config, factory: F, rng: R) -> Self {
        let policy = ReconnectPolicy::from_config(config);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(FeedSnapshot::new(policy.max_attempts()));

        Self {
            url: config.feed_url.clone(),
            factory,
            policy,
            state: ConnectionState::Connecting,
            history: PriceHistory::new(config.history_capacity),
            rng,
            generation: 0,
            active: None,
            pending: None,
            timer_tx,
            timer_rx,
            snapshot_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: FeedMetrics) -> Self {
        metrics.set_state(self.state);
        self.metrics = Some(metrics);
        self
    }

    /// Receiver for the renderer
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.policy.attempt_count()
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn has_active_stream(&self) -> bool {
        self.active.is_some()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.pending.is_some()
    }

    /// Mount, then process stream and timer events until `shutdown` fires
    /// or reconnect attempts run out.
    ///
    /// Returns `Ok(())` on shutdown and
    /// [`FeedError::MaxReconnectAttemptsExceeded`] once when giving up.
    /// Either way the stream and any timer are released on return.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.mount();

        loop {
            if self.state == ConnectionState::Failed {
                let attempts = self.policy.attempt_count();
                self.unmount();
                return Err(FeedError::MaxReconnectAttemptsExceeded { attempts });
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.unmount();
                    return Ok(());
                }
                event = next_stream_event(&mut self.active) => {
                    self.handle_stream_event(event);
                }
                Some(generation) = self.timer_rx.recv() => {
                    self.handle_timer(generation);
                }
            }
        }
    }

    /// Open the first stream
    pub fn mount(&mut self) {
        info!(url = %self.url, max_attempts = self.policy.max_attempts(), "Mounting price feed");
        self.connect();
    }

    /// Release the stream and cancel any pending reconnect. Idempotent.
    pub fn unmount(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.close();
        }
        self.cancel_pending();
        debug!(generation = self.generation, "Price feed unmounted");
    }

    /// Every attempt, first or retried, passes through `Connecting`
    fn connect(&mut self) {
        self.generation += 1;
        if let Some(metrics) = &self.metrics {
            metrics.connection_attempts.inc();
        }
        self.set_state(ConnectionState::Connecting);

        match self.factory.open(&self.url) {
            Ok(handle) => {
                debug!(generation = self.generation, "Stream opened");
                self.active = Some(handle);
            }
            Err(e) => {
                warn!(error = %e, generation = self.generation, "Failed to open stream");
                self.on_failure(&e.to_string());
            }
        }
    }

    /// `None` means the producer went away without reporting
    fn handle_stream_event(&mut self, event: Option<StreamEvent>) {
        match event {
            Some(StreamEvent::Ready) => self.on_ready(),
            Some(StreamEvent::Data(raw)) => self.on_data(&raw),
            Some(StreamEvent::Failure(reason)) => self.on_failure(&reason),
            None => self.on_failure("Stream closed"),
        }
    }

    fn on_ready(&mut self) {
        info!(
            generation = self.generation,
            previous_attempts = self.policy.attempt_count(),
            "Price stream open"
        );
        self.cancel_pending();
        self.policy.reset();
        self.set_state(ConnectionState::Open);
    }

    fn on_data(&mut self, raw: &str) {
        let sample = match PriceSample::parse(raw) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, payload = %raw, "Discarding malformed payload");
                if let Some(metrics) = &self.metrics {
                    metrics.payloads_discarded.inc();
                }
                return;
            }
        };

        let record = self
            .history
            .apply(sample.price, Local::now().time(), &mut self.rng);
        trace!(
            price = record.price,
            direction = ?record.direction,
            side = ?record.side,
            "Price accepted"
        );

        if let Some(metrics) = &self.metrics {
            metrics.samples_accepted.inc();
            metrics.last_price.set(sample.price);
        }
        self.publish();
    }

    fn on_failure(&mut self, reason: &str) {
        if let Some(mut handle) = self.active.take() {
            handle.close();
        }

        if self.pending.is_some() {
            debug!(reason = %reason, "Reconnect already pending, ignoring failure");
            return;
        }
        if self.state == ConnectionState::Failed {
            return;
        }

        match self.policy.record_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                warn!(
                    reason = %reason,
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Price stream failed, reconnecting"
                );
                self.schedule_reconnect(delay);
                self.set_state(ConnectionState::Reconnecting);
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(reason = %reason, attempts, "Price stream failed, giving up");
                self.cancel_pending();
                self.set_state(ConnectionState::Failed);
            }
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        let generation = self.generation;
        let timer_tx = self.timer_tx.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = timer_tx.send(generation);
        });

        if let Some(metrics) = &self.metrics {
            metrics.reconnects_scheduled.inc();
        }
        self.pending = Some(PendingReconnect { generation, task });
    }

    fn handle_timer(&mut self, generation: u64) {
        match &self.pending {
            Some(pending) if pending.generation == generation && generation == self.generation => {
                self.pending = None;
                info!(
                    attempt = self.policy.attempt_count(),
                    max_attempts = self.policy.max_attempts(),
                    "Reconnecting to price stream"
                );
                self.connect();
            }
            _ => debug!(generation, current = self.generation, "Ignoring stale reconnect timer"),
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        if let Some(metrics) = &self.metrics {
            metrics.set_state(state);
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(FeedSnapshot {
            state: self.state,
            attempt_count: self.policy.attempt_count(),
            max_attempts: self.policy.max_attempts(),
            history: self.history.to_vec(),
            watermarks: self.history.watermarks(),
        });
    }
}

impl<F, R> Drop for OrderBookFeed<F, R> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }
}

async fn next_stream_event(active: &mut Option<StreamHandle>) -> Option<StreamEvent> {
    match active {
        Some(handle) => handle.next_event().await,
        None => std::future::pending().await,
    }
}

/// A feed running on its own task.
///
/// Dropping the handle stops the feed the same way [`FeedHandle::shutdown`]
/// does, without waiting for it.
pub struct FeedHandle {
    snapshots: watch::Receiver<FeedSnapshot>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
    _stop_on_drop: DropGuard,
}

impl FeedHandle {
    /// Spawn `feed` on the current runtime
    pub fn spawn<F, R>(mut feed: OrderBookFeed<F, R>) -> Self
    where
        F: StreamFactory,
        R: Rng + Send + 'static,
    {
        let snapshots = feed.subscribe();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { feed.run(token).await });

        Self {
            snapshots,
            _stop_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            task,
        }
    }

    /// Latest published view
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshots.clone()
    }

    /// Token that stops the feed when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the feed and wait for it to release its resources
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for the feed to stop on its own
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| FeedError::Task(e.to_string()))?
    }
}
