//! Decoded frame container.
//!
//! Frames are interleaved RGB8, decoded in memory by the ingestion layer and
//! handed to pipeline elements by reference. Elements never own a frame and
//! never write one to disk; the only serialized form is the JPEG evidence
//! attachment produced by `encode_jpeg`.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

/// One decoded video frame (interleaved RGB8).
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw RGB8 pixels. Fails when the buffer does not match the
    /// declared dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb8",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode a JPEG image into a frame.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let (width, height) = image.dimensions();
        let rgb = image.into_rgb8();
        Ok(Self {
            data: rgb.into_raw(),
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Frame area in pixels, the denominator of every area ratio.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Encode as JPEG for the backend evidence upload.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85);
        encoder
            .encode(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;
        Ok(out)
    }

    /// Scale down to `target_height`, preserving aspect ratio. Returns a clone
    /// when the frame is already at or below the target.
    pub fn resize_to_height(&self, target_height: u32) -> Result<Self> {
        if target_height == 0 {
            return Err(anyhow!("target height must be non-zero"));
        }
        if self.height <= target_height {
            return Ok(self.clone());
        }
        let scale = target_height as f64 / self.height as f64;
        let new_width = ((self.width as f64 * scale).round() as u32).max(1);
        let img = image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer inconsistent with dimensions"))?;
        let resized = image::imageops::resize(
            &img,
            new_width,
            target_height,
            image::imageops::FilterType::Triangle,
        );
        Ok(Self {
            data: resized.into_raw(),
            width: new_width,
            height: target_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(vec![value; (width * height * 3) as usize], width, height).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4).is_err());
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let frame = solid_frame(32, 24, 128);
        let jpeg = frame.encode_jpeg().unwrap();
        let decoded = Frame::from_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.width, 32);
        assert_eq!(decoded.height, 24);
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let frame = solid_frame(640, 480, 7);
        let small = frame.resize_to_height(240).unwrap();
        assert_eq!(small.height, 240);
        assert_eq!(small.width, 320);
    }

    #[test]
    fn resize_is_noop_below_target() {
        let frame = solid_frame(320, 180, 7);
        let same = frame.resize_to_height(480).unwrap();
        assert_eq!(same.width, 320);
        assert_eq!(same.height, 180);
    }
}
