//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use vigil_models::TokenUsage;
use vigil_vision::{Completion, EncodedImage, GenerationParams, VisionError, VisionProvider, VisionResult};

/// Scripted provider. Pops queued responses, then repeats `default_text`.
pub struct MockProvider {
    name: String,
    default_text: String,
    queued: Mutex<VecDeque<VisionResult<Completion>>>,
    delay: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(name: &str, default_text: &str) -> Self {
        Self {
            name: name.to_string(),
            default_text: default_text.to_string(),
            queued: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_error(&self, err: VisionError) {
        self.queued.lock().push_back(Err(err));
    }

    pub fn push_text(&self, text: &str) {
        self.queued.lock().push_back(Ok(completion(text)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn completion(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        usage: Some(TokenUsage::new(100, 20)),
        latency: Duration::from_millis(5),
    }
}

#[async_trait]
impl VisionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn describe(
        &self,
        prompt: &str,
        _image: &EncodedImage,
        _params: &GenerationParams,
    ) -> VisionResult<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let queued = self.queued.lock().pop_front();
        queued.unwrap_or_else(|| Ok(completion(&self.default_text)))
    }
}

pub fn test_image() -> EncodedImage {
    EncodedImage::from_jpeg_bytes(&[0xFF, 0xD8, 0xFF, 0xD9])
}

pub fn gray_frame(value: u8) -> RgbImage {
    RgbImage::from_pixel(64, 48, Rgb([value, value, value]))
}
