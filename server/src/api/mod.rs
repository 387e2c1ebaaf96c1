//! HTTP server and routes

pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
