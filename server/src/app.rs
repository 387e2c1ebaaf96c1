//! Core application
//!
//! Wires the pipeline together: config → store → DLQ → hubs → writer →
//! receivers → HTTP, with every long-lived task registered on the shutdown
//! service. Any failure before the servers are up aborts startup (exit 1).

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::api::{ApiServer, AppState};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG_LEVEL};
use crate::core::shutdown::ShutdownService;
use crate::data::records::RecordKind;
use crate::data::{LogRecord, SpanRecord, SqliteStore, TelemetryStore, TraceRecord};
use crate::ingest::filter::FilterEngine;
use crate::ingest::writer::{BatchWriter, WriterHandle};
use crate::ingest::{IngestPipeline, OtlpGrpcServer};
use crate::queue::{DeadLetterQueue, DlqBatch, DlqReplay};
use crate::realtime::{BroadcastHub, SnapshotHub};

pub struct CoreApp {
    pub config: AppConfig,
    pub shutdown: ShutdownService,
    pub store: Arc<SqliteStore>,
    pub dlq: Arc<DeadLetterQueue>,
    pub broadcast: Arc<BroadcastHub>,
    pub snapshot: Arc<SnapshotHub>,
    pub writer: WriterHandle,
}

impl CoreApp {
    /// Run the collector until a shutdown signal arrives.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let config = AppConfig::load()?;
        let app = Self::init(config).await?;
        Self::start_server(app).await
    }

    async fn init(config: AppConfig) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::init(&config.db.dsn)
                .await
                .with_context(|| format!("failed to open store at {}", config.db.dsn))?,
        );
        let dlq = Arc::new(DeadLetterQueue::new(&config.dlq.path)?);
        let shutdown = ShutdownService::new(Arc::clone(&store));

        // Hubs and writer are constructed here but their tasks start in
        // start_server, after signal handlers are installed.
        let (broadcast, broadcast_task) = BroadcastHub::new();
        let telemetry: Arc<dyn TelemetryStore> = Arc::clone(&store) as Arc<dyn TelemetryStore>;
        let (snapshot, snapshot_task) = SnapshotHub::new(Arc::clone(&telemetry));

        let (writer, writer_task) =
            BatchWriter::new(Arc::clone(&telemetry), Arc::clone(&dlq)).start(shutdown.subscribe());

        shutdown.register(broadcast_task.start(shutdown.subscribe())).await;
        shutdown.register(snapshot_task.start(shutdown.subscribe())).await;
        shutdown.register(writer_task).await;

        let replay = Arc::new(StoreReplay {
            store: Arc::clone(&telemetry),
        });
        shutdown
            .register(dlq.start_replay_task(
                replay,
                config.dlq.replay_interval,
                shutdown.subscribe(),
            ))
            .await;

        shutdown
            .register(store.start_checkpoint_task(shutdown.subscribe()))
            .await;

        Ok(Self {
            config,
            shutdown,
            store,
            dlq,
            broadcast,
            snapshot,
            writer,
        })
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();

        let pipeline = Arc::new(IngestPipeline::new(
            FilterEngine::new(app.config.filter_config()),
            app.writer.clone(),
            Arc::clone(&app.broadcast),
            Arc::clone(&app.snapshot),
        ));

        let grpc_server = OtlpGrpcServer::new("0.0.0.0", app.config.grpc_port, pipeline)?;
        let grpc_shutdown = app.shutdown.subscribe();
        let grpc_handle = tokio::spawn(async move {
            if let Err(e) = grpc_server.start(grpc_shutdown).await {
                tracing::error!(error = %e, "OTLP gRPC server error");
            }
        });
        app.shutdown.register(grpc_handle).await;

        tracing::info!(
            http_port = app.config.http_port,
            grpc_port = app.config.grpc_port,
            "Argus collector listening"
        );

        let state = AppState {
            broadcast: Arc::clone(&app.broadcast),
            snapshot: Arc::clone(&app.snapshot),
            dlq: Arc::clone(&app.dlq),
        };
        let server = ApiServer::new("0.0.0.0", app.config.http_port, state, app.shutdown.clone())?;
        server.start().await?;

        app.shutdown.shutdown().await;
        Ok(())
    }

    fn init_logging() {
        let level = std::env::var(ENV_LOG_LEVEL)
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase();
        let default_filter = format!("{level},{APP_NAME_LOWER}={level}");

        let filter = std::env::var("RUST_LOG").unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}

/// DLQ replay callback: deserializes the spooled envelope and re-issues the
/// batched insert for its kind.
struct StoreReplay {
    store: Arc<dyn TelemetryStore>,
}

#[async_trait]
impl DlqReplay for StoreReplay {
    async fn replay(&self, data: &[u8]) -> Result<()> {
        let batch: DlqBatch = serde_json::from_slice(data).context("corrupt DLQ batch")?;
        match batch.kind {
            RecordKind::Trace => {
                let records: Vec<TraceRecord> = serde_json::from_value(batch.records)?;
                self.store.insert_traces(&records).await?;
            }
            RecordKind::Span => {
                let records: Vec<SpanRecord> = serde_json::from_value(batch.records)?;
                self.store.insert_spans(&records).await?;
            }
            RecordKind::Log => {
                let records: Vec<LogRecord> = serde_json::from_value(batch.records)?;
                self.store.insert_logs(&records).await?;
            }
        }
        Ok(())
    }
}
