//! Core application infrastructure

pub mod config;
pub mod constants;
pub mod metrics;
pub mod shutdown;

pub use crate::app::CoreApp;
pub use config::AppConfig;
pub use metrics::METRICS;
pub use shutdown::ShutdownService;
