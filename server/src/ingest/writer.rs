//! Asynchronous batch writer
//!
//! Consumes admitted records from a bounded queue and groups them into three
//! per-kind buffers. A buffer flushes when it reaches `BATCH_MAX` records or
//! `BATCH_TIMEOUT_MS` after its first record arrived, whichever comes first;
//! the kinds flush independently.
//!
//! Queue overflow is drop-newest with a counter: the receiver path must never
//! block on storage. A failed flush hands the whole batch to the DLQ and the
//! writer moves on; retries happen there, on longer time scales.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::constants::{
    BATCH_MAX, BATCH_TIMEOUT_MS, WRITER_DRAIN_RECV_MS, WRITER_QUEUE_CAPACITY,
};
use crate::core::metrics::METRICS;
use crate::data::records::{LogRecord, RecordKind, SpanRecord, TraceRecord};
use crate::data::store::TelemetryStore;
use crate::queue::{DeadLetterQueue, DlqBatch};

/// One admitted record on its way to storage.
#[derive(Debug, Clone)]
pub enum Record {
    Trace(TraceRecord),
    Span(SpanRecord),
    Log(LogRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Trace(_) => RecordKind::Trace,
            Record::Span(_) => RecordKind::Span,
            Record::Log(_) => RecordKind::Log,
        }
    }
}

/// Cheap handle receivers use to hand records to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    pub(crate) tx: mpsc::Sender<Record>,
}

impl WriterHandle {
    /// Non-blocking submit. A full queue drops the record (drop-newest) and
    /// increments the overflow counter; the caller never waits.
    pub fn submit(&self, record: Record) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                METRICS.writer_overflow.inc();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

struct KindBuffer<T> {
    items: Vec<T>,
    first_at: Option<Instant>,
}

impl<T> Default for KindBuffer<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            first_at: None,
        }
    }
}

impl<T> KindBuffer<T> {
    fn push(&mut self, item: T) -> usize {
        if self.items.is_empty() {
            self.first_at = Some(Instant::now());
        }
        self.items.push(item);
        self.items.len()
    }

    fn take(&mut self) -> Vec<T> {
        self.first_at = None;
        std::mem::take(&mut self.items)
    }

    fn deadline(&self, timeout: Duration) -> Option<Instant> {
        self.first_at.map(|t| t + timeout)
    }
}

pub struct BatchWriter {
    store: Arc<dyn TelemetryStore>,
    dlq: Arc<DeadLetterQueue>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn TelemetryStore>, dlq: Arc<DeadLetterQueue>) -> Self {
        Self { store, dlq }
    }

    /// Spawn the writer task and return the submit handle.
    pub fn start(self, shutdown_rx: watch::Receiver<bool>) -> (WriterHandle, JoinHandle<()>) {
        self.start_with_capacity(WRITER_QUEUE_CAPACITY, shutdown_rx)
    }

    pub(crate) fn start_with_capacity(
        self,
        capacity: usize,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> (WriterHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Record>(capacity);
        let handle = WriterHandle { tx };

        let task = tokio::spawn(async move {
            let timeout = Duration::from_millis(BATCH_TIMEOUT_MS);
            let mut traces: KindBuffer<TraceRecord> = KindBuffer::default();
            let mut spans: KindBuffer<SpanRecord> = KindBuffer::default();
            let mut logs: KindBuffer<LogRecord> = KindBuffer::default();

            tracing::debug!("BatchWriter started");

            loop {
                let next_deadline = [
                    traces.deadline(timeout),
                    spans.deadline(timeout),
                    logs.deadline(timeout),
                ]
                .into_iter()
                .flatten()
                .min();

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("BatchWriter received shutdown, draining...");
                            // Best-effort drain of records already queued.
                            while let Ok(Some(record)) = tokio::time::timeout(
                                Duration::from_millis(WRITER_DRAIN_RECV_MS),
                                rx.recv(),
                            )
                            .await
                            {
                                match record {
                                    Record::Trace(t) => { traces.push(t); }
                                    Record::Span(s) => { spans.push(s); }
                                    Record::Log(l) => { logs.push(l); }
                                }
                            }
                            self.flush_traces(&mut traces).await;
                            self.flush_spans(&mut spans).await;
                            self.flush_logs(&mut logs).await;
                            break;
                        }
                    }
                    maybe = rx.recv() => {
                        match maybe {
                            Some(Record::Trace(t)) => {
                                if traces.push(t) >= BATCH_MAX {
                                    self.flush_traces(&mut traces).await;
                                }
                            }
                            Some(Record::Span(s)) => {
                                if spans.push(s) >= BATCH_MAX {
                                    self.flush_spans(&mut spans).await;
                                }
                            }
                            Some(Record::Log(l)) => {
                                if logs.push(l) >= BATCH_MAX {
                                    self.flush_logs(&mut logs).await;
                                }
                            }
                            None => {
                                self.flush_traces(&mut traces).await;
                                self.flush_spans(&mut spans).await;
                                self.flush_logs(&mut logs).await;
                                break;
                            }
                        }
                    }
                    _ = sleep_until_opt(next_deadline) => {
                        let now = Instant::now();
                        if is_due(&traces, timeout, now) {
                            self.flush_traces(&mut traces).await;
                        }
                        if is_due(&spans, timeout, now) {
                            self.flush_spans(&mut spans).await;
                        }
                        if is_due(&logs, timeout, now) {
                            self.flush_logs(&mut logs).await;
                        }
                    }
                }
            }

            tracing::debug!("BatchWriter shutdown complete");
        });

        (handle, task)
    }

    async fn flush_traces(&self, buffer: &mut KindBuffer<TraceRecord>) {
        let batch = buffer.take();
        if batch.is_empty() {
            return;
        }
        let started = Instant::now();
        let result = self.store.insert_traces(&batch).await;
        METRICS.db_latency.observe(started.elapsed().as_secs_f64());
        if let Err(e) = result {
            tracing::warn!(error = %e, count = batch.len(), "Trace batch insert failed, spooling to DLQ");
            self.spool(RecordKind::Trace, &batch);
        }
    }

    async fn flush_spans(&self, buffer: &mut KindBuffer<SpanRecord>) {
        let batch = buffer.take();
        if batch.is_empty() {
            return;
        }
        let started = Instant::now();
        let result = self.store.insert_spans(&batch).await;
        METRICS.db_latency.observe(started.elapsed().as_secs_f64());
        if let Err(e) = result {
            tracing::warn!(error = %e, count = batch.len(), "Span batch insert failed, spooling to DLQ");
            self.spool(RecordKind::Span, &batch);
        }
    }

    async fn flush_logs(&self, buffer: &mut KindBuffer<LogRecord>) {
        let batch = buffer.take();
        if batch.is_empty() {
            return;
        }
        let started = Instant::now();
        let result = self.store.insert_logs(&batch).await;
        METRICS.db_latency.observe(started.elapsed().as_secs_f64());
        if let Err(e) = result {
            tracing::warn!(error = %e, count = batch.len(), "Log batch insert failed, spooling to DLQ");
            self.spool(RecordKind::Log, &batch);
        }
    }

    fn spool<T: serde::Serialize>(&self, kind: RecordKind, batch: &[T]) {
        let envelope = match DlqBatch::new(kind, batch) {
            Ok(envelope) => envelope,
            Err(e) => {
                METRICS.dlq_write_failures.inc();
                tracing::error!(error = %e, %kind, "Failed to serialize batch for DLQ, data lost");
                return;
            }
        };
        if let Err(e) = self.dlq.enqueue(&envelope) {
            METRICS.dlq_write_failures.inc();
            tracing::error!(error = %e, %kind, "Failed to write batch to DLQ, data lost");
        }
    }
}

fn is_due<T>(buffer: &KindBuffer<T>, timeout: Duration, now: Instant) -> bool {
    buffer
        .deadline(timeout)
        .is_some_and(|deadline| deadline <= now)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::stats::{DashboardStats, ServiceMap, TraceSummary, TrafficPoint};
    use crate::data::store::StoreError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeStore {
        traces: Mutex<Vec<TraceRecord>>,
        spans: Mutex<Vec<SpanRecord>>,
        logs: Mutex<Vec<LogRecord>>,
        fail: AtomicBool,
    }

    impl FakeStore {
        fn failing() -> Self {
            let store = Self::default();
            store.fail.store(true, Ordering::SeqCst);
            store
        }

        fn check_fail(&self) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StoreError::Other("insert failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TelemetryStore for FakeStore {
        async fn insert_traces(&self, batch: &[TraceRecord]) -> Result<(), StoreError> {
            self.check_fail()?;
            self.traces.lock().extend_from_slice(batch);
            Ok(())
        }

        async fn insert_spans(&self, batch: &[SpanRecord]) -> Result<(), StoreError> {
            self.check_fail()?;
            self.spans.lock().extend_from_slice(batch);
            Ok(())
        }

        async fn insert_logs(&self, batch: &[LogRecord]) -> Result<(), StoreError> {
            self.check_fail()?;
            self.logs.lock().extend_from_slice(batch);
            Ok(())
        }

        async fn dashboard_stats(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _service: Option<&str>,
        ) -> Result<DashboardStats, StoreError> {
            Ok(DashboardStats::default())
        }

        async fn traffic_series(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _service: Option<&str>,
        ) -> Result<Vec<TrafficPoint>, StoreError> {
            Ok(Vec::new())
        }

        async fn recent_traces(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _service: Option<&str>,
            _limit: u32,
        ) -> Result<Vec<TraceSummary>, StoreError> {
            Ok(Vec::new())
        }

        async fn service_map(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<ServiceMap, StoreError> {
            Ok(ServiceMap::default())
        }

        async fn purge_older_than(&self, _days: u32) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn vacuum(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn make_trace(id: &str) -> TraceRecord {
        TraceRecord {
            trace_id: id.to_string(),
            service_name: "order".to_string(),
            operation: "GET /".to_string(),
            status: "OK".to_string(),
            duration_us: 1000,
            timestamp: Utc::now(),
        }
    }

    fn make_log(body: &str) -> LogRecord {
        LogRecord {
            id: 0,
            trace_id: String::new(),
            span_id: String::new(),
            severity: crate::data::Severity::Info,
            body: body.to_string(),
            service_name: "order".to_string(),
            attributes_json: "{}".to_string(),
            ai_insight: None,
            timestamp: Utc::now(),
        }
    }

    fn setup(
        store: Arc<FakeStore>,
    ) -> (
        WriterHandle,
        JoinHandle<()>,
        watch::Sender<bool>,
        tempfile::TempDir,
        Arc<DeadLetterQueue>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let dlq = Arc::new(DeadLetterQueue::new(dir.path()).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) =
            BatchWriter::new(store, Arc::clone(&dlq)).start(shutdown_rx);
        (handle, task, shutdown_tx, dir, dlq)
    }

    #[tokio::test]
    async fn test_flush_on_timeout() {
        let store = Arc::new(FakeStore::default());
        let (handle, task, shutdown_tx, _dir, dlq) = setup(Arc::clone(&store));

        assert!(handle.submit(Record::Trace(make_trace("a"))));
        assert!(handle.submit(Record::Log(make_log("hello"))));

        tokio::time::sleep(Duration::from_millis(2 * BATCH_TIMEOUT_MS + 100)).await;
        assert_eq!(store.traces.lock().len(), 1);
        assert_eq!(store.logs.lock().len(), 1);
        assert_eq!(dlq.size(), 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_on_batch_max() {
        let store = Arc::new(FakeStore::default());
        let (handle, task, shutdown_tx, _dir, _dlq) = setup(Arc::clone(&store));

        for i in 0..BATCH_MAX {
            assert!(handle.submit(Record::Trace(make_trace(&format!("t{i}")))));
        }

        // Well before the 200ms timer: the size threshold alone triggers it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.traces.lock().len(), BATCH_MAX);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_lands_in_dlq() {
        let store = Arc::new(FakeStore::failing());
        let (handle, task, shutdown_tx, _dir, dlq) = setup(Arc::clone(&store));

        handle.submit(Record::Trace(make_trace("a")));
        tokio::time::sleep(Duration::from_millis(2 * BATCH_TIMEOUT_MS + 100)).await;

        assert_eq!(store.traces.lock().len(), 0);
        assert_eq!(dlq.size(), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_record_reaches_store_or_dlq_never_lost() {
        // Half the records hit a healthy store, half a failing one; every
        // record must end up in exactly one of store / DLQ.
        let store = Arc::new(FakeStore::default());
        let (handle, task, shutdown_tx, _dir, dlq) = setup(Arc::clone(&store));

        for i in 0..10 {
            handle.submit(Record::Log(make_log(&format!("log-{i}"))));
        }
        tokio::time::sleep(Duration::from_millis(2 * BATCH_TIMEOUT_MS + 100)).await;

        store.fail.store(true, Ordering::SeqCst);
        for i in 10..20 {
            handle.submit(Record::Log(make_log(&format!("log-{i}"))));
        }
        tokio::time::sleep(Duration::from_millis(2 * BATCH_TIMEOUT_MS + 100)).await;

        assert_eq!(store.logs.lock().len(), 10);
        assert_eq!(dlq.size(), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_partial_buffers() {
        let store = Arc::new(FakeStore::default());
        let (handle, task, shutdown_tx, _dir, _dlq) = setup(Arc::clone(&store));

        handle.submit(Record::Span(SpanRecord {
            span_id: "s1".to_string(),
            parent_span_id: String::new(),
            trace_id: "t1".to_string(),
            service_name: "order".to_string(),
            operation_name: "op".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_us: 100,
            attributes_json: "{}".to_string(),
            status: "OK".to_string(),
        }));

        // Shut down immediately, before the 200ms flush timer fires.
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(store.spans.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_overflow_is_drop_newest() {
        // Capacity 1 and no consumer: the second submit must drop, not block.
        let (tx, _rx) = mpsc::channel::<Record>(1);
        let handle = WriterHandle { tx };

        assert!(handle.submit(Record::Trace(make_trace("kept"))));
        let before = METRICS.writer_overflow.get();
        assert!(!handle.submit(Record::Trace(make_trace("dropped"))));
        assert_eq!(METRICS.writer_overflow.get(), before + 1);
    }
}
