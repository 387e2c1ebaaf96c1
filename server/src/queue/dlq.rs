//! Dead-letter queue
//!
//! Disk-backed spool for batches that failed to persist. A failed batch is
//! serialized to `batch_<unix_nanos>.json` and a background worker
//! periodically re-submits every spooled file through an injected replay
//! callback, deleting a file only after its replay succeeded.
//!
//! Files are written to a temp path and renamed, so a process kill mid-write
//! leaves no half-written `.json` behind. A crash between a successful replay
//! and the unlink re-delivers one batch; the store's primary-key idempotency
//! absorbs the duplicate.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::metrics::METRICS;
use crate::data::records::RecordKind;

const DLQ_FILE_EXT: &str = "json";

/// Envelope written to disk for one failed batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct DlqBatch {
    pub kind: RecordKind,
    pub enqueued_at: DateTime<Utc>,
    pub records: serde_json::Value,
}

impl DlqBatch {
    pub fn new<T: Serialize>(kind: RecordKind, records: &[T]) -> serde_json::Result<Self> {
        Ok(Self {
            kind,
            enqueued_at: Utc::now(),
            records: serde_json::to_value(records)?,
        })
    }
}

/// Replay callback invoked per spooled file. The caller supplies the
/// deserialization and insert logic so the queue stays storage-agnostic.
#[async_trait]
pub trait DlqReplay: Send + Sync {
    async fn replay(&self, data: &[u8]) -> Result<()>;
}

pub struct DeadLetterQueue {
    dir: PathBuf,
    // Serializes enqueue and unlink so nanosecond filenames cannot collide.
    mu: Mutex<()>,
}

impl DeadLetterQueue {
    /// Create the queue, creating its directory if needed. Failure here is a
    /// fatal startup error.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create DLQ directory {}", dir.display()))?;
        Ok(Self {
            dir,
            mu: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize a failed batch to disk. Called when a batched insert fails;
    /// an error here means the data is truly lost and is counted as such by
    /// the caller.
    pub fn enqueue(&self, batch: &DlqBatch) -> Result<()> {
        let data = serde_json::to_vec(batch).context("failed to serialize DLQ batch")?;

        let _guard = self.mu.lock();
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1000));
        let filename = format!("batch_{nanos}.{DLQ_FILE_EXT}");
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!(".{filename}.tmp"));

        write_atomic(&tmp_path, &path, &self.dir, &data)
            .with_context(|| format!("failed to write DLQ file {}", path.display()))?;

        tracing::warn!(file = %filename, bytes = data.len(), "Batch written to DLQ");
        self.refresh_size();
        Ok(())
    }

    /// Number of spooled batch files. Refreshes the `dlq_size` gauge.
    pub fn size(&self) -> usize {
        let _guard = self.mu.lock();
        let count = self.list_files().len();
        METRICS.dlq_size.set(count as i64);
        count
    }

    fn refresh_size(&self) {
        METRICS.dlq_size.set(self.list_files().len() as i64);
    }

    /// Spooled `.json` files sorted by filename, which sorts nanosecond
    /// timestamps chronologically. Anything else in the directory is ignored.
    fn list_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "DLQ: failed to read directory");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension().and_then(|e| e.to_str()) == Some(DLQ_FILE_EXT)
                    && !p
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'))
            })
            .collect();
        files.sort();
        files
    }

    /// Start the periodic replay worker.
    pub fn start_replay_task(
        self: &Arc<Self>,
        replay: Arc<dyn DlqReplay>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let dlq = Arc::clone(self);
        tracing::debug!(dir = %dlq.dir.display(), interval_secs = interval.as_secs(), "DLQ replay worker started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of tokio's interval fires immediately; skip it so
            // the first replay attempt happens a full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("DLQ replay worker shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        dlq.process_files(replay.as_ref()).await;
                    }
                }
            }
        })
    }

    /// Replay every spooled file once, removing each file only after its
    /// replay succeeded. Failed files stay for the next tick.
    pub async fn process_files(&self, replay: &dyn DlqReplay) {
        let files = {
            let _guard = self.mu.lock();
            self.list_files()
        };

        let mut replayed = 0usize;
        for path in files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(file = %name, error = %e, "DLQ: failed to read file");
                    continue;
                }
            };

            if let Err(e) = replay.replay(&data).await {
                tracing::warn!(file = %name, error = %e, "DLQ: replay failed, will retry later");
                continue;
            }

            let _guard = self.mu.lock();
            match fs::remove_file(&path) {
                Ok(()) => {
                    replayed += 1;
                    METRICS.dlq_replayed.inc();
                    tracing::info!(file = %name, "DLQ file replayed and removed");
                }
                Err(e) => {
                    tracing::error!(file = %name, error = %e, "DLQ: failed to remove replayed file");
                }
            }
        }

        {
            let _guard = self.mu.lock();
            self.refresh_size();
        }

        if replayed > 0 {
            tracing::info!(replayed, "DLQ replay cycle complete");
        }
    }
}

/// Write `data` to `tmp_path`, fsync, rename over `path`, and fsync the
/// directory entry.
fn write_atomic(tmp_path: &Path, path: &Path, dir: &Path, data: &[u8]) -> std::io::Result<()> {
    {
        let mut file = fs::File::create(tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o644))?;
    }
    fs::rename(tmp_path, path)?;
    #[cfg(unix)]
    {
        if let Ok(dir_file) = fs::File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::records::{Severity, TraceRecord};
    use crate::data::LogRecord;
    use parking_lot::Mutex as SyncMutex;

    struct RecordingReplay {
        calls: SyncMutex<Vec<Vec<u8>>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingReplay {
        fn new(fail: bool) -> Self {
            Self {
                calls: SyncMutex::new(Vec::new()),
                fail: std::sync::atomic::AtomicBool::new(fail),
            }
        }
    }

    #[async_trait]
    impl DlqReplay for RecordingReplay {
        async fn replay(&self, data: &[u8]) -> Result<()> {
            self.calls.lock().push(data.to_vec());
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("store still down");
            }
            Ok(())
        }
    }

    fn make_trace_batch() -> DlqBatch {
        let traces = vec![TraceRecord {
            trace_id: "a".repeat(32),
            service_name: "order".to_string(),
            operation: "GET /".to_string(),
            status: "OK".to_string(),
            duration_us: 1000,
            timestamp: Utc::now(),
        }];
        DlqBatch::new(RecordKind::Trace, &traces).unwrap()
    }

    #[test]
    fn test_enqueue_creates_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();

        dlq.enqueue(&make_trace_batch()).unwrap();

        assert_eq!(dlq.size(), 1);
        let files = dlq.list_files();
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("batch_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_enqueued_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();

        dlq.enqueue(&make_trace_batch()).unwrap();

        let data = fs::read(&dlq.list_files()[0]).unwrap();
        let batch: DlqBatch = serde_json::from_slice(&data).unwrap();
        assert_eq!(batch.kind, RecordKind::Trace);
        let records: Vec<TraceRecord> = serde_json::from_value(batch.records).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service_name, "order");
    }

    #[test]
    fn test_size_ignores_non_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();

        fs::write(dir.path().join("notes.txt"), b"not a batch").unwrap();
        fs::write(dir.path().join(".batch_1.json.tmp"), b"partial").unwrap();
        assert_eq!(dlq.size(), 0);

        dlq.enqueue(&make_trace_batch()).unwrap();
        assert_eq!(dlq.size(), 1);
    }

    #[tokio::test]
    async fn test_replay_success_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        dlq.enqueue(&make_trace_batch()).unwrap();

        let replay = RecordingReplay::new(false);
        dlq.process_files(&replay).await;

        assert_eq!(replay.calls.lock().len(), 1);
        assert_eq!(dlq.size(), 0);
    }

    #[tokio::test]
    async fn test_replay_failure_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        dlq.enqueue(&make_trace_batch()).unwrap();

        let replay = RecordingReplay::new(true);
        dlq.process_files(&replay).await;
        assert_eq!(dlq.size(), 1);

        // Next cycle after the store recovers drains it.
        replay.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        dlq.process_files(&replay).await;
        assert_eq!(dlq.size(), 0);
    }

    #[tokio::test]
    async fn test_replay_processes_files_in_chronological_order() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();

        let logs = vec![LogRecord {
            id: 0,
            trace_id: String::new(),
            span_id: String::new(),
            severity: Severity::Info,
            body: "late".to_string(),
            service_name: "order".to_string(),
            attributes_json: "{}".to_string(),
            ai_insight: None,
            timestamp: Utc::now(),
        }];
        dlq.enqueue(&make_trace_batch()).unwrap();
        dlq.enqueue(&DlqBatch::new(RecordKind::Log, &logs).unwrap()).unwrap();

        let replay = RecordingReplay::new(false);
        dlq.process_files(&replay).await;

        let calls = replay.calls.lock();
        assert_eq!(calls.len(), 2);
        let first: DlqBatch = serde_json::from_slice(&calls[0]).unwrap();
        let second: DlqBatch = serde_json::from_slice(&calls[1]).unwrap();
        assert_eq!(first.kind, RecordKind::Trace);
        assert_eq!(second.kind, RecordKind::Log);
    }

    #[tokio::test]
    async fn test_replay_skips_unreadable_garbage_without_removing_valid_work() {
        struct StrictReplay;

        #[async_trait]
        impl DlqReplay for StrictReplay {
            async fn replay(&self, data: &[u8]) -> Result<()> {
                let _: DlqBatch = serde_json::from_slice(data).context("corrupt batch")?;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        fs::write(dir.path().join("batch_1.json"), b"{truncated").unwrap();
        dlq.enqueue(&make_trace_batch()).unwrap();

        dlq.process_files(&StrictReplay).await;

        // The corrupt file stays; the valid one was replayed and removed.
        assert_eq!(dlq.size(), 1);
    }
}
