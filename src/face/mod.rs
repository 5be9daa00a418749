//! Face engine port.
//!
//! Like detection, face location/embedding extraction is an external black
//! box. The port is deliberately narrow: locate-and-embed on a frame, embed a
//! reference photo, and compare two embeddings. Everything else (caching,
//! throttling, dedup) lives in the face-recognition pipeline element.

mod stub;

pub use stub::StubFaceEngine;

use anyhow::Result;

use crate::frame::Frame;

/// Opaque face embedding vector produced by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceEmbedding(pub Vec<f32>);

/// Face engine port.
pub trait FaceEngine {
    /// Locate every face in a (typically downscaled) frame and return one
    /// embedding per face.
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceEmbedding>>;

    /// Embed the first face found in a reference photo, or `None` when the
    /// photo contains no detectable face.
    fn embed_image(&mut self, image: &Frame) -> Result<Option<FaceEmbedding>>;

    /// Distance between two embeddings; lower is more similar.
    fn distance(&self, a: &FaceEmbedding, b: &FaceEmbedding) -> f32;
}
