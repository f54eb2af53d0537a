//! Frame encoding for provider payloads.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};

use crate::error::{VisionError, VisionResult};

/// Default JPEG quality for frames sent over the network.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// A base64-encoded image ready to embed in a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: String,
}

impl EncodedImage {
    /// Encode an RGB frame as JPEG.
    pub fn from_rgb(image: &RgbImage, quality: u8) -> VisionResult<Self> {
        let mut buf = Cursor::new(Vec::new());
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder
            .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
            .map_err(|e| VisionError::image_encoding(e.to_string()))?;
        Ok(Self::from_jpeg_bytes(buf.get_ref()))
    }

    /// Wrap already-encoded JPEG bytes.
    pub fn from_jpeg_bytes(bytes: &[u8]) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data: BASE64.encode(bytes),
        }
    }

    /// `data:` URL used by chat-completions style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Size of the encoded payload in bytes.
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_rgb_frame() {
        let img = RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10]));
        let encoded = EncodedImage::from_rgb(&img, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(encoded.mime_type, "image/jpeg");
        let raw = BASE64.decode(&encoded.data).unwrap();
        // JPEG SOI marker
        assert_eq!(&raw[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_data_url() {
        let encoded = EncodedImage::from_jpeg_bytes(&[1, 2, 3]);
        assert_eq!(encoded.data_url(), "data:image/jpeg;base64,AQID");
        assert_eq!(encoded.encoded_len(), 4);
    }
}
