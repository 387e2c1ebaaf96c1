//! Buffered log broadcast hub
//!
//! Fans individual log records out to connected WebSocket clients. Instead of
//! sending each log on its own (which would freeze a dashboard at high
//! throughput), the hub buffers entries and flushes them as one JSON array
//! when the buffer reaches `HUB_BUFFER_MAX` or the flush ticker fires.
//!
//! The stream is advisory: the internal channel drops on overflow, and a
//! client whose outbound channel is full is disconnected rather than ever
//! making ingest wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::constants::{HUB_BROADCAST_CAPACITY, HUB_BUFFER_MAX, HUB_FLUSH_INTERVAL_MS};
use crate::core::metrics::METRICS;
use crate::data::records::LogRecord;

struct HubClient {
    id: u64,
    sender: mpsc::Sender<String>,
}

/// Handle held by receivers and WebSocket handlers.
pub struct BroadcastHub {
    register_tx: mpsc::UnboundedSender<HubClient>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    broadcast_tx: mpsc::Sender<LogRecord>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> (Arc<Self>, BroadcastHubTask) {
        Self::with_capacity(HUB_BROADCAST_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> (Arc<Self>, BroadcastHubTask) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);

        let hub = Arc::new(Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            next_id: AtomicU64::new(1),
        });
        let task = BroadcastHubTask {
            register_rx,
            unregister_rx,
            broadcast_rx,
            clients: HashMap::new(),
            buffer: Vec::with_capacity(HUB_BUFFER_MAX),
        };
        (hub, task)
    }

    /// Register a client by its outbound channel. Returns the client id used
    /// to unregister later.
    pub fn register(&self, sender: mpsc::Sender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.register_tx.send(HubClient { id, sender });
        id
    }

    pub fn unregister(&self, id: u64) {
        let _ = self.unregister_tx.send(id);
    }

    /// Non-blocking submit of a log entry. Overflow silently drops the entry
    /// (counted); the UI stream is never allowed to stall ingest.
    pub fn broadcast(&self, entry: LogRecord) {
        if self.broadcast_tx.try_send(entry).is_err() {
            METRICS.broadcast_dropped.inc();
        }
    }
}

/// The hub's event loop state; consumed by `start`.
pub struct BroadcastHubTask {
    register_rx: mpsc::UnboundedReceiver<HubClient>,
    unregister_rx: mpsc::UnboundedReceiver<u64>,
    broadcast_rx: mpsc::Receiver<LogRecord>,
    clients: HashMap<u64, mpsc::Sender<String>>,
    buffer: Vec<LogRecord>,
}

impl BroadcastHubTask {
    pub fn start(mut self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(HUB_FLUSH_INTERVAL_MS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::debug!("Broadcast hub started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            self.flush();
                            let remaining = self.clients.len();
                            self.clients.clear();
                            METRICS.active_connections.sub(remaining as i64);
                            tracing::debug!("Broadcast hub stopped");
                            break;
                        }
                    }
                    Some(client) = self.register_rx.recv() => {
                        self.clients.insert(client.id, client.sender);
                        METRICS.active_connections.inc();
                        tracing::info!(total = self.clients.len(), "WebSocket client connected");
                    }
                    Some(id) = self.unregister_rx.recv() => {
                        if self.clients.remove(&id).is_some() {
                            METRICS.active_connections.dec();
                            tracing::info!(total = self.clients.len(), "WebSocket client disconnected");
                        }
                    }
                    Some(entry) = self.broadcast_rx.recv() => {
                        self.buffer.push(entry);
                        if self.buffer.len() >= HUB_BUFFER_MAX {
                            self.flush();
                        }
                    }
                    _ = ticker.tick() => {
                        self.flush();
                    }
                }
            }
        })
    }

    /// Send the buffered logs as one JSON array to every connected client.
    /// Clients whose channel is full are shed on the spot.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(HUB_BUFFER_MAX));

        let payload = match serde_json::to_string(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Hub: failed to serialize batch");
                return;
            }
        };

        let mut slow: Vec<u64> = Vec::new();
        for (id, sender) in &self.clients {
            if sender.try_send(payload.clone()).is_err() {
                slow.push(*id);
            }
        }
        for id in slow {
            self.clients.remove(&id);
            METRICS.active_connections.dec();
            tracing::warn!(total = self.clients.len(), "Hub: slow client removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::records::Severity;
    use chrono::Utc;

    fn make_log(body: &str) -> LogRecord {
        LogRecord {
            id: 0,
            trace_id: String::new(),
            span_id: String::new(),
            severity: Severity::Info,
            body: body.to_string(),
            service_name: "order".to_string(),
            attributes_json: "{}".to_string(),
            ai_insight: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ticker_flush_delivers_json_array() {
        let (hub, task) = BroadcastHub::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = task.start(shutdown_rx);

        let (tx, mut rx) = mpsc::channel(8);
        hub.register(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.broadcast(make_log("one"));
        hub.broadcast(make_log("two"));

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let batch: Vec<LogRecord> = serde_json::from_str(&payload).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "one");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_buffer_full_flushes_before_ticker() {
        let (hub, task) = BroadcastHub::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = task.start(shutdown_rx);

        let (tx, mut rx) = mpsc::channel(8);
        hub.register(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..HUB_BUFFER_MAX {
            hub.broadcast(make_log(&format!("log-{i}")));
        }

        // Well inside the 500ms ticker window.
        let payload = tokio::time::timeout(Duration::from_millis(250), rx.recv())
            .await
            .expect("size-triggered flush should not wait for the ticker")
            .unwrap();
        let batch: Vec<LogRecord> = serde_json::from_str(&payload).unwrap();
        assert_eq!(batch.len(), HUB_BUFFER_MAX);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_client_is_shed_and_healthy_client_keeps_streaming() {
        let (hub, task) = BroadcastHub::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = task.start(shutdown_rx);

        // Slow client: capacity 1 and never consumed.
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        hub.register(slow_tx);
        let (healthy_tx, mut healthy_rx) = mpsc::channel(64);
        hub.register(healthy_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // First flush fills the slow client's channel.
        for i in 0..HUB_BUFFER_MAX {
            hub.broadcast(make_log(&format!("a-{i}")));
        }
        tokio::time::timeout(Duration::from_secs(1), healthy_rx.recv())
            .await
            .unwrap()
            .unwrap();

        // Second flush cannot enqueue for the slow client: it gets dropped.
        for i in 0..HUB_BUFFER_MAX {
            hub.broadcast(make_log(&format!("b-{i}")));
        }
        tokio::time::timeout(Duration::from_secs(1), healthy_rx.recv())
            .await
            .unwrap()
            .unwrap();

        // Drain the one message the slow client got, then observe the close.
        slow_rx.recv().await.unwrap();
        assert!(slow_rx.recv().await.is_none());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_overflow_drops_silently() {
        // Tiny channel and no running task: overflow must not block.
        let (hub, _task) = BroadcastHub::with_capacity(2);
        let before = METRICS.broadcast_dropped.get();

        hub.broadcast(make_log("1"));
        hub.broadcast(make_log("2"));
        hub.broadcast(make_log("3"));

        assert_eq!(METRICS.broadcast_dropped.get(), before + 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining_buffer() {
        let (hub, task) = BroadcastHub::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = task.start(shutdown_rx);

        let (tx, mut rx) = mpsc::channel(8);
        hub.register(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.broadcast(make_log("last"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let payload = rx.recv().await.unwrap();
        assert!(payload.contains("last"));
        // Hub dropped its sender on shutdown.
        assert!(rx.recv().await.is_none());
    }
}
