//! Firestore REST API client.
//!
//! This crate provides:
//! - An analysis repository writing layer 2 and layer 3 results
//! - Service account authentication via gcp_auth (or the local emulator)
//! - Retry logic with jitter honoring Retry-After

pub mod client;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use repository::{AnalysisRepository, ANALYST_COLLECTION, SPECIALIST_COLLECTION};
pub use retry::RetryConfig;
pub use token_cache::{AuthSource, TokenCache};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
