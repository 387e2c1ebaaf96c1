//! Debounced snapshot hub
//!
//! Second live endpoint: instead of streaming entries, it periodically
//! recomputes a compact aggregate view over a rolling window and pushes it to
//! every connected dashboard client. Recomputation is debounced: receivers
//! call `notify_refresh()` on every ingest, and any burst of notifications
//! within the window collapses into a single recompute.
//!
//! Each client may narrow its view to one service by sending a
//! `{"service":"<name>"}` message; the hub computes once per distinct filter
//! per tick. A failed computation re-sends the last successful payload so the
//! UI never flickers to an error state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::constants::{
    SNAPSHOT_DEBOUNCE_SECS, SNAPSHOT_RECENT_TRACES_LIMIT, SNAPSHOT_WINDOW_MINUTES,
};
use crate::core::metrics::METRICS;
use crate::data::stats::{DashboardStats, ServiceMap, TraceSummary, TrafficPoint};
use crate::data::store::TelemetryStore;

/// A complete dashboard snapshot, serialized as one JSON object per push.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotPayload {
    pub generated_at: chrono::DateTime<Utc>,
    pub window_minutes: i64,
    pub stats: DashboardStats,
    pub traffic: Vec<TrafficPoint>,
    pub recent_traces: Vec<TraceSummary>,
    pub service_map: ServiceMap,
}

/// Client → hub filter message. An empty or missing service means "all".
#[derive(Debug, Deserialize)]
struct FilterMessage {
    service: Option<String>,
}

/// Parse a client filter message. Errors mean the client sent garbage and
/// should be disconnected.
pub fn parse_filter_message(text: &str) -> Result<Option<String>, serde_json::Error> {
    let message: FilterMessage = serde_json::from_str(text)?;
    Ok(message.service.filter(|s| !s.is_empty()))
}

struct ClientState {
    sender: mpsc::Sender<String>,
    service: Option<String>,
}

/// Handle held by receivers and WebSocket handlers.
pub struct SnapshotHub {
    register_tx: mpsc::UnboundedSender<(u64, mpsc::Sender<String>)>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    filter_tx: mpsc::UnboundedSender<(u64, Option<String>)>,
    refresh: Arc<Notify>,
    next_id: AtomicU64,
}

impl SnapshotHub {
    pub fn new(store: Arc<dyn TelemetryStore>) -> (Arc<Self>, SnapshotHubTask) {
        Self::with_timing(
            store,
            Duration::from_secs(SNAPSHOT_DEBOUNCE_SECS),
            chrono::Duration::minutes(SNAPSHOT_WINDOW_MINUTES),
            SNAPSHOT_RECENT_TRACES_LIMIT,
        )
    }

    pub(crate) fn with_timing(
        store: Arc<dyn TelemetryStore>,
        debounce: Duration,
        window: chrono::Duration,
        recent_limit: u32,
    ) -> (Arc<Self>, SnapshotHubTask) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (filter_tx, filter_rx) = mpsc::unbounded_channel();
        let refresh = Arc::new(Notify::new());

        let hub = Arc::new(Self {
            register_tx,
            unregister_tx,
            filter_tx,
            refresh: Arc::clone(&refresh),
            next_id: AtomicU64::new(1),
        });
        let task = SnapshotHubTask {
            store,
            register_rx,
            unregister_rx,
            filter_rx,
            refresh,
            clients: HashMap::new(),
            last_payloads: HashMap::new(),
            debounce,
            window,
            recent_limit,
        };
        (hub, task)
    }

    /// Register a client by its outbound channel. The client starts with the
    /// all-services view.
    pub fn register(&self, sender: mpsc::Sender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.register_tx.send((id, sender));
        id
    }

    pub fn unregister(&self, id: u64) {
        let _ = self.unregister_tx.send(id);
    }

    /// Change a client's service filter; its view updates on the next tick.
    pub fn set_filter(&self, id: u64, service: Option<String>) {
        let _ = self.filter_tx.send((id, service));
    }

    /// Signal that new data arrived. Cheap and non-blocking; bursts coalesce
    /// into one recompute per debounce window.
    pub fn notify_refresh(&self) {
        self.refresh.notify_one();
    }
}

/// The hub's event loop state; consumed by `start`.
pub struct SnapshotHubTask {
    store: Arc<dyn TelemetryStore>,
    register_rx: mpsc::UnboundedReceiver<(u64, mpsc::Sender<String>)>,
    unregister_rx: mpsc::UnboundedReceiver<u64>,
    filter_rx: mpsc::UnboundedReceiver<(u64, Option<String>)>,
    refresh: Arc<Notify>,
    clients: HashMap<u64, ClientState>,
    /// Last successful payload per filter key, re-sent when a recompute fails.
    last_payloads: HashMap<String, String>,
    debounce: Duration,
    window: chrono::Duration,
    recent_limit: u32,
}

fn filter_key(service: Option<&str>) -> String {
    service.unwrap_or("").to_string()
}

impl SnapshotHubTask {
    pub fn start(mut self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Deadline of the pending recompute, if one is scheduled.
            let mut pending: Option<Instant> = None;

            tracing::debug!("Snapshot hub started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            let remaining = self.clients.len();
                            self.clients.clear();
                            METRICS.active_connections.sub(remaining as i64);
                            tracing::debug!("Snapshot hub stopped");
                            break;
                        }
                    }
                    Some((id, sender)) = self.register_rx.recv() => {
                        METRICS.active_connections.inc();
                        // First paint: hand the new client the cached view if
                        // one exists, otherwise schedule a recompute.
                        if let Some(payload) = self.last_payloads.get(&filter_key(None)) {
                            let _ = sender.try_send(payload.clone());
                        } else if pending.is_none() {
                            pending = Some(Instant::now() + self.debounce);
                        }
                        self.clients.insert(id, ClientState { sender, service: None });
                        tracing::info!(total = self.clients.len(), "Dashboard client connected");
                    }
                    Some(id) = self.unregister_rx.recv() => {
                        if self.clients.remove(&id).is_some() {
                            METRICS.active_connections.dec();
                            tracing::info!(total = self.clients.len(), "Dashboard client disconnected");
                        }
                    }
                    Some((id, service)) = self.filter_rx.recv() => {
                        if let Some(client) = self.clients.get_mut(&id) {
                            client.service = service;
                            if pending.is_none() {
                                pending = Some(Instant::now() + self.debounce);
                            }
                        }
                    }
                    _ = self.refresh.notified() => {
                        if pending.is_none() {
                            pending = Some(Instant::now() + self.debounce);
                        }
                    }
                    _ = sleep_until_opt(pending) => {
                        pending = None;
                        self.recompute_and_push().await;
                    }
                }
            }
        })
    }

    /// Compute one snapshot per distinct client filter and push it to the
    /// matching clients, shedding any client whose channel is full.
    async fn recompute_and_push(&mut self) {
        if self.clients.is_empty() {
            return;
        }

        let filters: HashSet<Option<String>> =
            self.clients.values().map(|c| c.service.clone()).collect();

        for service in filters {
            let key = filter_key(service.as_deref());
            let payload = match self.compute(service.as_deref()).await {
                Ok(payload) => {
                    self.last_payloads.insert(key, payload.clone());
                    payload
                }
                Err(e) => {
                    tracing::warn!(error = %e, service = ?service, "Snapshot computation failed");
                    match self.last_payloads.get(&key) {
                        Some(last) => last.clone(),
                        None => continue,
                    }
                }
            };

            let mut slow: Vec<u64> = Vec::new();
            for (id, client) in &self.clients {
                if client.service != service {
                    continue;
                }
                if client.sender.try_send(payload.clone()).is_err() {
                    slow.push(*id);
                }
            }
            for id in slow {
                self.clients.remove(&id);
                METRICS.active_connections.dec();
                tracing::warn!(total = self.clients.len(), "Snapshot hub: slow client removed");
            }
        }
    }

    async fn compute(&self, service: Option<&str>) -> anyhow::Result<String> {
        let end = Utc::now();
        let start = end - self.window;

        let stats = self.store.dashboard_stats(start, end, service).await?;
        let traffic = self.store.traffic_series(start, end, service).await?;
        let recent_traces = self
            .store
            .recent_traces(start, end, service, self.recent_limit)
            .await?;
        let service_map = self.store.service_map(start, end).await?;

        let payload = SnapshotPayload {
            generated_at: end,
            window_minutes: self.window.num_minutes(),
            stats,
            traffic,
            recent_traces,
            service_map,
        };
        Ok(serde_json::to_string(&payload)?)
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
