//! Three-layer cascading video analysis.
//!
//! - Layer 1: [`LocalDetector`] runs on every frame, no network
//! - Layer 2: [`ThrottledAnalyst`] describes frames under a call budget
//! - Layer 3: [`SpecialistEscalator`] produces structured threat analysis
//!
//! [`Pipeline`] schedules all three and publishes a merged [`PipelineState`].
//!
//! [`PipelineState`]: vigil_models::PipelineState

pub mod analyst;
pub mod budget;
pub mod config;
pub mod detector;
pub mod error;
pub mod flight;
pub mod keywords;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod sink;
pub mod source;
pub mod specialist;

#[cfg(test)]
pub(crate) mod testing;

pub use analyst::ThrottledAnalyst;
pub use budget::{BudgetConfig, CallBudget};
pub use config::{AnalystBackend, PipelineConfig};
pub use detector::{DetectionModel, LocalDetector, MotionModel};
pub use error::{DetectorError, PipelineError, PipelineResult, SourceError, SpecialistError};
pub use keywords::{KeywordStrategy, SubstringKeywords};
pub use logging::PipelineLogger;
pub use orchestrator::{NoopOverlay, Overlay, Pipeline, PipelineBuilder, StateObserver};
pub use sink::{FirestoreSink, MemorySink, NoopSink, ResultSink};
pub use source::{
    open_source, DecodeOptions, EmbeddedSource, FfmpegSource, Frame, FrameSource,
    ImageSequenceSource, VideoSourceSpec,
};
pub use specialist::{Escalation, SpecialistEscalator};
