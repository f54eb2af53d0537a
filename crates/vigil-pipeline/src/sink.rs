//! Persistence sinks for completed analysis results.

use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use tracing::{debug, warn};
use vigil_firestore::AnalysisRepository;
use vigil_models::AnalysisRecord;

use crate::error::PipelineResult;
use crate::metrics::record_sink_write;

/// Receives every completed analyst and specialist result.
///
/// Durability is the sink's concern; the pipeline only logs failures.
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    async fn persist(&self, record: &AnalysisRecord) -> PipelineResult<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl ResultSink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn persist(&self, _record: &AnalysisRecord) -> PipelineResult<()> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AnalysisRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn persist(&self, record: &AnalysisRecord) -> PipelineResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

type WriteLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Writes records to Firestore under a per-second write quota.
///
/// Writes over quota are dropped, not delayed.
pub struct FirestoreSink {
    repo: AnalysisRepository,
    limiter: WriteLimiter,
}

impl FirestoreSink {
    pub fn new(repo: AnalysisRepository, writes_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(writes_per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            repo,
            limiter: RateLimiter::direct(quota),
        }
    }
}

#[async_trait]
impl ResultSink for FirestoreSink {
    fn name(&self) -> &str {
        "firestore"
    }

    async fn persist(&self, record: &AnalysisRecord) -> PipelineResult<()> {
        if self.limiter.check().is_err() {
            warn!(kind = record.kind(), session_id = %record.session_id(), "Sink write quota exceeded, dropping record");
            record_sink_write(record.kind(), "dropped");
            return Ok(());
        }

        match self.repo.save(record).await {
            Ok(doc) => {
                debug!(kind = record.kind(), doc_id = doc.id().unwrap_or("-"), "Record persisted");
                record_sink_write(record.kind(), "ok");
                Ok(())
            }
            Err(e) => {
                record_sink_write(record.kind(), "error");
                Err(e.into())
            }
        }
    }
}
