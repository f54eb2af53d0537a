//! Analysis repository: one document per completed analyst or specialist result.

use std::collections::HashMap;

use tracing::debug;
use vigil_models::{AnalysisRecord, AnalystResult, SessionId, SpecialistResult};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::metrics::record_written;
use crate::types::{Document, ToFirestoreValue, Value};

/// Collection for layer 2 results.
pub const ANALYST_COLLECTION: &str = "videoAnalysis";

/// Collection for layer 3 results.
pub const SPECIALIST_COLLECTION: &str = "specialistAnalysis";

/// Repository for analysis documents.
#[derive(Clone)]
pub struct AnalysisRepository {
    client: FirestoreClient,
}

impl AnalysisRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Persist a record into its collection. Returns the stored document.
    pub async fn save(&self, record: &AnalysisRecord) -> FirestoreResult<Document> {
        let (collection, fields) = match record {
            AnalysisRecord::Analyst { session_id, result } => {
                (ANALYST_COLLECTION, analyst_fields(session_id, result))
            }
            AnalysisRecord::Specialist { session_id, result } => {
                (SPECIALIST_COLLECTION, specialist_fields(session_id, result))
            }
        };

        let doc = self
            .client
            .with_retry("save_analysis", || {
                self.client.create_document(collection, None, fields.clone())
            })
            .await?;

        record_written(collection);
        debug!(
            collection = collection,
            session_id = %record.session_id(),
            doc_id = doc.id().unwrap_or("-"),
            "Persisted analysis record"
        );
        Ok(doc)
    }

    /// Fetch a stored document by collection and ID.
    pub async fn get(&self, collection: &str, doc_id: &str) -> FirestoreResult<Option<Document>> {
        self.client.get_document(collection, doc_id).await
    }
}

fn analyst_fields(session_id: &SessionId, result: &AnalystResult) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("sessionId".to_string(), session_id.as_str().to_firestore_value());
    fields.insert("description".to_string(), result.description.to_firestore_value());
    fields.insert(
        "keywords".to_string(),
        result.keywords.iter().cloned().collect::<Vec<String>>().to_firestore_value(),
    );
    fields.insert("frameNumber".to_string(), result.frame_sequence_number.to_firestore_value());
    fields.insert(
        "triggerReason".to_string(),
        result.trigger_reason.as_str().to_firestore_value(),
    );
    fields.insert("timestamp".to_string(), result.produced_at.to_firestore_value());
    fields.insert("latencyMs".to_string(), result.latency_ms.to_firestore_value());
    if let Some(usage) = result.usage {
        fields.insert("totalTokens".to_string(), usage.total_tokens.to_firestore_value());
    }
    fields
}

fn specialist_fields(session_id: &SessionId, result: &SpecialistResult) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("sessionId".to_string(), session_id.as_str().to_firestore_value());
    fields.insert("provider".to_string(), result.provider.as_str().to_firestore_value());
    fields.insert("analysis".to_string(), result.narrative.to_firestore_value());
    fields.insert("confidence".to_string(), result.confidence.to_firestore_value());
    fields.insert(
        "detectedObjects".to_string(),
        result.detected_entities.to_firestore_value(),
    );
    fields.insert("threats".to_string(), result.threats.to_firestore_value());
    fields.insert(
        "recommendations".to_string(),
        result.recommendations.to_firestore_value(),
    );
    fields.insert("trigger".to_string(), result.trigger.as_str().to_firestore_value());
    fields.insert("timestamp".to_string(), result.produced_at.to_firestore_value());
    fields.insert("latencyMs".to_string(), result.latency_ms.to_firestore_value());
    if let Some(usage) = result.usage {
        fields.insert("totalTokens".to_string(), usage.total_tokens.to_firestore_value());
    }
    fields
}
