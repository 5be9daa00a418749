use std::collections::VecDeque;

use anyhow::Result;

use crate::face::{FaceEmbedding, FaceEngine};
use crate::frame::Frame;

/// Scripted face engine for tests and for running the daemon without a model.
///
/// `detect_faces` and `embed_image` pop queued results in order; once a queue
/// is exhausted the engine reports no faces. Distances are Euclidean, so
/// tests control match/no-match purely through the embedding values they
/// script.
pub struct StubFaceEngine {
    frame_faces: VecDeque<Vec<FaceEmbedding>>,
    image_faces: VecDeque<Option<FaceEmbedding>>,
}

impl StubFaceEngine {
    pub fn new() -> Self {
        Self {
            frame_faces: VecDeque::new(),
            image_faces: VecDeque::new(),
        }
    }

    /// Queue the faces located by the next `detect_faces` call.
    pub fn push_frame_faces(&mut self, faces: Vec<FaceEmbedding>) {
        self.frame_faces.push_back(faces);
    }

    /// Queue the result of the next `embed_image` call.
    pub fn push_image_face(&mut self, face: Option<FaceEmbedding>) {
        self.image_faces.push_back(face);
    }
}

impl Default for StubFaceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceEngine for StubFaceEngine {
    fn detect_faces(&mut self, _frame: &Frame) -> Result<Vec<FaceEmbedding>> {
        Ok(self.frame_faces.pop_front().unwrap_or_default())
    }

    fn embed_image(&mut self, _image: &Frame) -> Result<Option<FaceEmbedding>> {
        Ok(self.image_faces.pop_front().unwrap_or(None))
    }

    fn distance(&self, a: &FaceEmbedding, b: &FaceEmbedding) -> f32 {
        a.0.iter()
            .zip(&b.0)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}
