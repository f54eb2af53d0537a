//! Layer 1: local presence detection.
//!
//! Runs synchronously on every frame with no network access. Model load
//! failures and inference errors degrade to a neutral signal instead of
//! propagating.

use std::time::{Duration, Instant};

use chrono::Utc;
use image::RgbImage;
use tracing::{debug, info, warn};
use vigil_models::{DetectionSignal, Landmark};

use crate::error::DetectorError;
use crate::metrics::record_deadline_miss;
use crate::source::Frame;

/// An on-device inference model.
pub trait DetectionModel: Send {
    fn name(&self) -> &str;

    /// Load weights or warm up. Called once before the first frame.
    fn load(&mut self) -> Result<(), DetectorError>;

    fn infer(&mut self, image: &RgbImage) -> Result<DetectionSignal, DetectorError>;
}

/// Grid cell edge in downscaled pixels.
const CELL_SIZE: u32 = 8;

/// Mean per-cell luma change that maps to a full score.
const FULL_SCALE_DIFF: f32 = 48.0;

/// Working width for differencing.
const WORK_WIDTH: u32 = 160;

/// Frame-differencing motion model.
///
/// Downscales to luma, compares each grid cell against the previous frame
/// and groups active cells into 4-connected regions. Each region whose score
/// reaches the threshold is one subject.
pub struct MotionModel {
    threshold: f32,
    previous: Option<Vec<f32>>,
    grid: (u32, u32),
}

impl MotionModel {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            previous: None,
            grid: (0, 0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Mean luma per grid cell.
    fn cell_luma(&mut self, image: &RgbImage) -> Vec<f32> {
        let (w, h) = image.dimensions();
        let work_w = WORK_WIDTH.min(w).max(CELL_SIZE);
        let work_h = ((h as f32 * work_w as f32 / w.max(1) as f32).round() as u32).max(CELL_SIZE);
        let small = image::imageops::resize(image, work_w, work_h, image::imageops::FilterType::Triangle);

        let cols = work_w / CELL_SIZE;
        let rows = work_h / CELL_SIZE;
        self.grid = (cols, rows);

        let mut cells = vec![0.0f32; (cols * rows) as usize];
        for (x, y, px) in small.enumerate_pixels() {
            let (cx, cy) = (x / CELL_SIZE, y / CELL_SIZE);
            if cx >= cols || cy >= rows {
                continue;
            }
            let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            cells[(cy * cols + cx) as usize] += luma;
        }
        let per_cell = (CELL_SIZE * CELL_SIZE) as f32;
        for c in cells.iter_mut() {
            *c /= per_cell;
        }
        cells
    }

    fn regions(&self, scores: &[f32]) -> Vec<Landmark> {
        let (cols, rows) = self.grid;
        let mut visited = vec![false; scores.len()];
        let mut landmarks = Vec::new();
        // Cells below half the threshold never join a region
        let floor = (self.threshold * 0.5).max(f32::EPSILON);

        for start in 0..scores.len() {
            if visited[start] || scores[start] < floor {
                continue;
            }
            let mut stack = vec![start];
            visited[start] = true;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (cols, rows, 0, 0);
            let mut sum = 0.0f32;
            let mut count = 0u32;

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx as u32 % cols, idx as u32 / cols);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                sum += scores[idx];
                count += 1;

                let mut neighbours = Vec::with_capacity(4);
                if x > 0 {
                    neighbours.push(idx - 1);
                }
                if x + 1 < cols {
                    neighbours.push(idx + 1);
                }
                if y > 0 {
                    neighbours.push(idx - cols as usize);
                }
                if y + 1 < rows {
                    neighbours.push(idx + cols as usize);
                }
                for n in neighbours {
                    if !visited[n] && scores[n] >= floor {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }

            landmarks.push(Landmark {
                x: min_x as f32 / cols as f32,
                y: min_y as f32 / rows as f32,
                width: (max_x - min_x + 1) as f32 / cols as f32,
                height: (max_y - min_y + 1) as f32 / rows as f32,
                score: (sum / count as f32).clamp(0.0, 1.0),
            });
        }
        landmarks
    }
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl DetectionModel for MotionModel {
    fn name(&self) -> &str {
        "motion"
    }

    fn load(&mut self) -> Result<(), DetectorError> {
        self.previous = None;
        Ok(())
    }

    fn infer(&mut self, image: &RgbImage) -> Result<DetectionSignal, DetectorError> {
        let (w, h) = image.dimensions();
        if w < CELL_SIZE || h < CELL_SIZE {
            return Err(DetectorError::inference(format!(
                "frame {}x{} smaller than one cell",
                w, h
            )));
        }

        let cells = self.cell_luma(image);
        let previous = match self.previous.replace(cells.clone()) {
            Some(prev) if prev.len() == cells.len() => prev,
            // First frame or resolution change
            _ => return Ok(DetectionSignal::neutral()),
        };

        let scores: Vec<f32> = cells
            .iter()
            .zip(previous.iter())
            .map(|(c, p)| ((c - p).abs() / FULL_SCALE_DIFF).clamp(0.0, 1.0))
            .collect();

        let landmarks = self.regions(&scores);
        let subjects: Vec<Landmark> = landmarks
            .into_iter()
            .filter(|l| l.score >= self.threshold)
            .collect();
        let confidence = subjects.iter().map(|l| l.score).fold(0.0f32, f32::max);

        Ok(DetectionSignal {
            has_activity: !subjects.is_empty(),
            subject_count: subjects.len() as u32,
            confidence,
            landmarks: if subjects.is_empty() { None } else { Some(subjects) },
            captured_at: Utc::now(),
        })
    }
}

/// Wraps a [`DetectionModel`] with failure isolation and frame-budget timing.
pub struct LocalDetector {
    model: Box<dyn DetectionModel>,
    ready: bool,
    frame_budget: Duration,
    deadline_misses: u64,
    last_activity: Option<Instant>,
}

impl LocalDetector {
    pub fn new(model: Box<dyn DetectionModel>, target_fps: f32) -> Self {
        Self {
            model,
            ready: false,
            frame_budget: Duration::from_secs_f64(1.0 / target_fps.max(0.001) as f64),
            deadline_misses: 0,
            last_activity: None,
        }
    }

    /// Load the model. Failure leaves the detector in neutral mode.
    pub fn initialize(&mut self) -> Result<(), DetectorError> {
        match self.model.load() {
            Ok(()) => {
                self.ready = true;
                info!(model = self.model.name(), "Local detector ready");
                Ok(())
            }
            Err(e) => {
                self.ready = false;
                warn!(model = self.model.name(), error = %e, "Local detector unavailable, using neutral detection");
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Never fails. Returns a neutral signal when not ready or on error.
    pub fn detect(&mut self, frame: &Frame) -> DetectionSignal {
        if !self.ready {
            return DetectionSignal::neutral();
        }

        let start = Instant::now();
        let signal = match self.model.infer(&frame.image) {
            Ok(signal) => signal,
            Err(e) => {
                debug!(model = self.model.name(), error = %e, "Detection failed");
                DetectionSignal::neutral()
            }
        };
        let elapsed = start.elapsed();

        if elapsed > self.frame_budget {
            self.deadline_misses += 1;
            record_deadline_miss();
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.frame_budget.as_millis() as u64,
                "Detector exceeded frame budget"
            );
        }
        if signal.has_activity {
            self.last_activity = Some(Instant::now());
        }
        signal
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }

    pub fn time_since_last_activity(&self) -> Option<Duration> {
        self.last_activity.map(|t| t.elapsed())
    }
}
