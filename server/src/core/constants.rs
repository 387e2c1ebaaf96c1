// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Argus";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "argus";

// =============================================================================
// Environment Variables
// =============================================================================

pub const ENV_APP_ENV: &str = "APP_ENV";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_HTTP_PORT: &str = "HTTP_PORT";
pub const ENV_GRPC_PORT: &str = "GRPC_PORT";
pub const ENV_DB_DRIVER: &str = "DB_DRIVER";
pub const ENV_DB_DSN: &str = "DB_DSN";
pub const ENV_DLQ_PATH: &str = "DLQ_PATH";
pub const ENV_DLQ_REPLAY_INTERVAL: &str = "DLQ_REPLAY_INTERVAL";
pub const ENV_INGEST_MIN_SEVERITY: &str = "INGEST_MIN_SEVERITY";
pub const ENV_INGEST_ALLOWED_SERVICES: &str = "INGEST_ALLOWED_SERVICES";
pub const ENV_INGEST_EXCLUDED_SERVICES: &str = "INGEST_EXCLUDED_SERVICES";

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_APP_ENV: &str = "development";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Standard OTLP gRPC port
pub const DEFAULT_GRPC_PORT: u16 = 4317;

pub const DEFAULT_DB_DRIVER: &str = "sqlite";
pub const DEFAULT_DB_DSN: &str = "argus.db";
pub const DEFAULT_DLQ_PATH: &str = "./data/dlq";
pub const DEFAULT_DLQ_REPLAY_INTERVAL: &str = "5m";

// =============================================================================
// Batch Writer
// =============================================================================

/// Flush a per-kind buffer when it reaches this many records
pub const BATCH_MAX: usize = 500;

/// Flush a per-kind buffer this long after its first record arrived
pub const BATCH_TIMEOUT_MS: u64 = 200;

/// Writer ingest queue capacity; overflow is drop-newest with a counter
pub const WRITER_QUEUE_CAPACITY: usize = 8192;

/// Per-receive timeout while draining the queue during shutdown
pub const WRITER_DRAIN_RECV_MS: u64 = 100;

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Internal broadcast channel capacity; overflow drops the entry
pub const HUB_BROADCAST_CAPACITY: usize = 5000;

/// Flush the log buffer when it reaches this many entries
pub const HUB_BUFFER_MAX: usize = 100;

/// Flush the log buffer at least this often
pub const HUB_FLUSH_INTERVAL_MS: u64 = 500;

/// Per-client outbound channel capacity; a full channel sheds the client
pub const CLIENT_SEND_CAPACITY: usize = 256;

/// Per-connection WebSocket write timeout in seconds
pub const CLIENT_WRITE_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// Snapshot Hub
// =============================================================================

/// Coalescing window between a refresh notification and the recompute
pub const SNAPSHOT_DEBOUNCE_SECS: u64 = 5;

/// Rolling window the snapshot aggregates over
pub const SNAPSHOT_WINDOW_MINUTES: i64 = 15;

/// Cap on the recent-traces list in a snapshot payload
pub const SNAPSHOT_RECENT_TRACES_LIMIT: u32 = 50;

// =============================================================================
// OTLP Ingress
// =============================================================================

/// Body limit for OTLP messages (16 MB)
pub const OTLP_BODY_LIMIT: usize = 16 * 1024 * 1024;

// =============================================================================
// SQLite
// =============================================================================

pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// WAL checkpoint interval in seconds (5 minutes)
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown deadline in seconds; unflushed in-memory data past this
/// point is lost (it never reached durability)
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
