//! Records handed to the persistence sink.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::AnalystResult;
use crate::specialist::SpecialistResult;

/// Unique identifier for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A completed result ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisRecord {
    Analyst {
        session_id: SessionId,
        result: AnalystResult,
    },
    Specialist {
        session_id: SessionId,
        result: SpecialistResult,
    },
}

impl AnalysisRecord {
    pub fn session_id(&self) -> &SessionId {
        match self {
            AnalysisRecord::Analyst { session_id, .. } => session_id,
            AnalysisRecord::Specialist { session_id, .. } => session_id,
        }
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        match self {
            AnalysisRecord::Analyst { result, .. } => result.produced_at,
            AnalysisRecord::Specialist { result, .. } => result.produced_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisRecord::Analyst { .. } => "analyst",
            AnalysisRecord::Specialist { .. } => "specialist",
        }
    }
}
