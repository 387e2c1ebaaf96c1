//! HTTP server initialization
//!
//! The historical-query API lives outside this core; what is served here is
//! the operational surface: health, Prometheus metrics, and the two live
//! WebSocket endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use super::routes::{health, metrics, realtime};
use crate::core::ShutdownService;
use crate::queue::DeadLetterQueue;
use crate::realtime::{BroadcastHub, SnapshotHub};

#[derive(Clone)]
pub struct AppState {
    pub broadcast: Arc<BroadcastHub>,
    pub snapshot: Arc<SnapshotHub>,
    pub dlq: Arc<DeadLetterQueue>,
}

pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
    shutdown: ShutdownService,
}

impl ApiServer {
    pub fn new(host: &str, port: u16, state: AppState, shutdown: ShutdownService) -> Result<Self> {
        let addr = SocketAddr::new(host.parse()?, port);
        Ok(Self {
            addr,
            state,
            shutdown,
        })
    }

    /// Bind and serve until the shutdown signal fires. Bind failure is a
    /// fatal startup error.
    pub async fn start(self) -> Result<()> {
        let router = Router::new()
            .route("/api/health", get(health::health))
            .route("/metrics", get(metrics::metrics))
            .route("/ws/logs", get(realtime::logs_ws))
            .route("/ws/dashboard", get(realtime::dashboard_ws))
            .with_state(self.state);

        tracing::debug!(addr = %self.addr, "Starting HTTP server");

        let listener = TcpListener::bind(self.addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(self.shutdown.wait())
            .await?;

        Ok(())
    }
}
