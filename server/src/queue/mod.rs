//! Durable failure recovery

pub mod dlq;

pub use dlq::{DeadLetterQueue, DlqBatch, DlqReplay};
