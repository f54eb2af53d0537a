//! Layer 1 detection signal.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A detected region in normalized frame coordinates [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Region score [0, 1]
    pub score: f32,
}

impl Landmark {
    /// Get the center point in normalized coordinates.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Get area (normalized).
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Presence signal produced for every frame by the local detector.
///
/// Held only for the current frame and the latest snapshot; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionSignal {
    pub has_activity: bool,
    pub subject_count: u32,
    /// Confidence [0, 1]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Landmark>>,
    pub captured_at: DateTime<Utc>,
}

impl DetectionSignal {
    /// Signal reported when the detector is unavailable or inference failed.
    pub fn neutral() -> Self {
        Self {
            has_activity: false,
            subject_count: 0,
            confidence: 0.0,
            landmarks: None,
            captured_at: Utc::now(),
        }
    }

    /// Summary passed to the network layers to enrich prompts.
    pub fn context(&self) -> DetectionContext {
        DetectionContext {
            subject_count: self.subject_count,
            confidence: self.confidence,
            has_activity: self.has_activity,
        }
    }
}

impl Default for DetectionSignal {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Detection summary forwarded to layers 2 and 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionContext {
    pub subject_count: u32,
    pub confidence: f32,
    pub has_activity: bool,
}

impl DetectionContext {
    /// Confidence rendered as a whole percentage.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_signal() {
        let signal = DetectionSignal::neutral();
        assert!(!signal.has_activity);
        assert_eq!(signal.subject_count, 0);
        assert_eq!(signal.confidence, 0.0);
        assert!(signal.landmarks.is_none());
    }

    #[test]
    fn test_context_from_signal() {
        let signal = DetectionSignal {
            has_activity: true,
            subject_count: 3,
            confidence: 0.824,
            landmarks: None,
            captured_at: Utc::now(),
        };
        let ctx = signal.context();
        assert_eq!(ctx.subject_count, 3);
        assert!(ctx.has_activity);
        assert_eq!(ctx.confidence_percent(), 82);
    }

    #[test]
    fn test_landmark_geometry() {
        let lm = Landmark { x: 0.2, y: 0.4, width: 0.2, height: 0.4, score: 0.9 };
        let (cx, cy) = lm.center();
        assert!((cx - 0.3).abs() < 1e-6);
        assert!((cy - 0.6).abs() < 1e-6);
        assert!((lm.area() - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_signal_serialization_skips_missing_landmarks() {
        let json = serde_json::to_value(DetectionSignal::neutral()).unwrap();
        assert!(json.get("landmarks").is_none());
        assert_eq!(json["has_activity"], false);
    }
}
