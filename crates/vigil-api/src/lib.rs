//! Axum HTTP/WS surface for the analysis pipeline.
//!
//! This crate provides:
//! - Pipeline control (start, stop, manual escalation)
//! - The merged state snapshot over REST and WebSocket
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
