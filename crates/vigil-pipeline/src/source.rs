//! Video frame sources.
//!
//! The pipeline only needs the current frame as an RGB buffer, whether the
//! source has ended, and its pixel dimensions. Sources that cannot expose
//! raw pixels (third-party embedded players) report so and are rejected at
//! start.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SourceError;

/// One sampled frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    /// Offset from the start of playback
    pub position: Duration,
}

/// A live or file-backed frame source.
pub trait FrameSource: Send + Sync {
    /// Latest frame, if one is available yet.
    fn current_frame(&self) -> Option<Frame>;

    fn has_ended(&self) -> bool;

    /// `(width, height)` in pixels.
    fn dimensions(&self) -> (u32, u32);

    fn supports_pixel_access(&self) -> bool {
        true
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Plays a fixed list of stills at a constant rate on the tokio clock.
pub struct ImageSequenceSource {
    frames: Vec<Arc<RgbImage>>,
    fps: f32,
    looping: bool,
    started_at: Instant,
    label: String,
}

impl ImageSequenceSource {
    pub fn from_frames(frames: Vec<RgbImage>, fps: f32, looping: bool) -> Self {
        Self {
            frames: frames.into_iter().map(Arc::new).collect(),
            fps: fps.max(0.001),
            looping,
            started_at: Instant::now(),
            label: "in-memory sequence".to_string(),
        }
    }

    /// Load every image in `dir` in file name order.
    pub fn open(dir: impl AsRef<Path>, fps: f32, looping: bool) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(SourceError::open_failed(format!(
                "No images found in {}",
                dir.display()
            )));
        }

        let frames = paths
            .iter()
            .map(|p| image::open(p).map(|img| img.to_rgb8()))
            .collect::<Result<Vec<_>, _>>()?;

        info!(dir = %dir.display(), frames = frames.len(), fps, "Opened image sequence");

        let mut source = Self::from_frames(frames, fps, looping);
        source.label = dir.display().to_string();
        Ok(source)
    }

    fn index_at(&self, elapsed: Duration) -> usize {
        (elapsed.as_secs_f64() * self.fps as f64).floor() as usize
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn current_frame(&self) -> Option<Frame> {
        if self.frames.is_empty() {
            return None;
        }
        let elapsed = self.started_at.elapsed();
        let mut idx = self.index_at(elapsed);
        if idx >= self.frames.len() {
            if !self.looping {
                return None;
            }
            idx %= self.frames.len();
        }
        Some(Frame {
            image: Arc::clone(&self.frames[idx]),
            position: elapsed,
        })
    }

    fn has_ended(&self) -> bool {
        !self.looping && self.index_at(self.started_at.elapsed()) >= self.frames.len()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frames
            .first()
            .map(|f| f.dimensions())
            .unwrap_or((0, 0))
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.label)
    }
}

/// Decodes a file or stream with ffmpeg into rgb24 frames.
///
/// A reader task keeps only the most recent frame; older frames are dropped.
pub struct FfmpegSource {
    latest: Arc<Mutex<Option<Frame>>>,
    ended: Arc<AtomicBool>,
    width: u32,
    height: u32,
    input: String,
    _child: tokio::sync::Mutex<Child>,
}

impl FfmpegSource {
    /// Spawn ffmpeg for `input`, scaling to `width`x`height` at `fps`.
    ///
    /// `realtime` paces local files at native speed (`-re`).
    pub fn spawn(
        input: &str,
        width: u32,
        height: u32,
        fps: f32,
        realtime: bool,
    ) -> Result<Self, SourceError> {
        let frame_len = rgb24_frame_len(width, height).ok_or_else(|| {
            SourceError::open_failed(format!("Unusable frame size {}x{}", width, height))
        })?;
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if realtime {
            cmd.arg("-re");
        }
        cmd.args(["-i", input])
            .args([
                "-vf",
                &format!("fps={},scale={}:{}", fps, width, height),
                "-pix_fmt",
                "rgb24",
                "-f",
                "rawvideo",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SourceError::open_failed(format!("Failed to spawn ffmpeg: {}", e)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::open_failed("Failed to capture ffmpeg stdout"))?;

        let latest: Arc<Mutex<Option<Frame>>> = Arc::new(Mutex::new(None));
        let ended = Arc::new(AtomicBool::new(false));

        {
            let latest = Arc::clone(&latest);
            let ended = Arc::clone(&ended);
            let input = input.to_string();
            tokio::spawn(async move {
                let mut buf = vec![0u8; frame_len];
                let mut count: u64 = 0;
                loop {
                    if let Err(e) = stdout.read_exact(&mut buf).await {
                        debug!(input = %input, frames = count, error = %e, "ffmpeg stream closed");
                        break;
                    }
                    match RgbImage::from_raw(width, height, buf.clone()) {
                        Some(image) => {
                            *latest.lock() = Some(Frame {
                                image: Arc::new(image),
                                position: frame_position(count, fps),
                            });
                            count += 1;
                        }
                        None => {
                            warn!(input = %input, "Discarding malformed ffmpeg frame");
                        }
                    }
                }
                ended.store(true, Ordering::SeqCst);
            });
        }

        info!(input = %input, width, height, fps, "Started ffmpeg frame source");

        Ok(Self {
            latest,
            ended,
            width,
            height,
            input: input.to_string(),
            _child: tokio::sync::Mutex::new(child),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn current_frame(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn describe(&self) -> String {
        format!("ffmpeg {}", self.input)
    }
}

/// A third-party embedded player. Playable by a browser, not analyzable here.
pub struct EmbeddedSource {
    url: String,
}

impl EmbeddedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl FrameSource for EmbeddedSource {
    fn current_frame(&self) -> Option<Frame> {
        None
    }

    fn has_ended(&self) -> bool {
        false
    }

    fn dimensions(&self) -> (u32, u32) {
        (0, 0)
    }

    fn supports_pixel_access(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("embedded player {}", self.url)
    }
}

/// How to open a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoSourceSpec {
    /// A local video file, or a directory of stills.
    Local { path: String },
    /// A live stream URL ffmpeg can read (rtsp, hls, http).
    Stream { url: String },
    /// A third-party player URL (YouTube and similar).
    Embedded { url: String },
}

/// Decode resolution and rate for ffmpeg-backed sources.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 30.0,
        }
    }
}

/// Open a source from its spec.
pub async fn open_source(
    spec: &VideoSourceSpec,
    options: DecodeOptions,
) -> Result<Arc<dyn FrameSource>, SourceError> {
    match spec {
        VideoSourceSpec::Local { path } => {
            let p = PathBuf::from(path);
            if p.is_dir() {
                let fps = options.fps;
                let source =
                    tokio::task::spawn_blocking(move || ImageSequenceSource::open(p, fps, false))
                        .await
                        .map_err(|e| SourceError::open_failed(e.to_string()))??;
                Ok(Arc::new(source))
            } else if p.is_file() {
                Ok(Arc::new(FfmpegSource::spawn(
                    path,
                    options.width,
                    options.height,
                    options.fps,
                    true,
                )?))
            } else {
                Err(SourceError::open_failed(format!("No such file: {}", path)))
            }
        }
        VideoSourceSpec::Stream { url } => Ok(Arc::new(FfmpegSource::spawn(
            url,
            options.width,
            options.height,
            options.fps,
            false,
        )?)),
        VideoSourceSpec::Embedded { url } => Ok(Arc::new(EmbeddedSource::new(url.clone()))),
    }
}

/// Byte length of one rgb24 frame. `None` for empty or oversized frames.
fn rgb24_frame_len(width: u32, height: u32) -> Option<usize> {
    let len = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(3)?;
    (len > 0).then_some(len)
}

/// Stream position of frame `count` at `fps`.
fn frame_position(count: u64, fps: f32) -> Duration {
    Duration::from_secs_f64(count as f64 / f64::from(fps.max(0.001)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(8, 6, Rgb([value, value, value]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_plays_at_rate_then_ends() {
        let source = ImageSequenceSource::from_frames(vec![solid(0), solid(100), solid(200)], 2.0, false);
        assert_eq!(source.dimensions(), (8, 6));
        assert_eq!(source.current_frame().unwrap().image.get_pixel(0, 0)[0], 0);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(source.current_frame().unwrap().image.get_pixel(0, 0)[0], 100);
        assert!(!source.has_ended());

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(source.has_ended());
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn test_rgb24_frame_len() {
        assert_eq!(rgb24_frame_len(640, 360), Some(691_200));
        assert_eq!(rgb24_frame_len(0, 360), None);
        // 3 * 65536 * 65536 does not fit in u32
        #[cfg(target_pointer_width = "64")]
        assert_eq!(rgb24_frame_len(65_536, 65_536), Some(12_884_901_888));
    }

    #[test]
    fn test_frame_position_past_u32_frames() {
        assert_eq!(frame_position(45, 15.0), Duration::from_secs(3));
        let late = frame_position(u64::from(u32::MAX) + 30, 30.0);
        assert!(late > Duration::from_secs(u64::from(u32::MAX) / 30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_looping_sequence_never_ends() {
        let source = ImageSequenceSource::from_frames(vec![solid(10), solid(20)], 1.0, true);
        tokio::time::advance(Duration::from_millis(2500)).await;
        assert!(!source.has_ended());
        assert_eq!(source.current_frame().unwrap().image.get_pixel(0, 0)[0], 10);
    }

    #[test]
    fn test_open_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        solid(50).save(dir.path().join("b.png")).unwrap();
        solid(5).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = ImageSequenceSource::open(dir.path(), 10.0, false).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.frames[0].get_pixel(0, 0)[0], 5);
    }

    #[test]
    fn test_open_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 10.0, false),
            Err(SourceError::OpenFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_embedded_source_has_no_pixels() {
        let spec: VideoSourceSpec =
            serde_json::from_str(r#"{"kind":"embedded","url":"https://youtube.com/embed/x"}"#).unwrap();
        let source = open_source(&spec, DecodeOptions::default()).await.unwrap();
        assert!(!source.supports_pixel_access());
        assert!(source.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_missing_local_path() {
        let spec = VideoSourceSpec::Local {
            path: "/definitely/not/here.mp4".to_string(),
        };
        assert!(open_source(&spec, DecodeOptions::default()).await.is_err());
    }
}
