//! Detection engine port.
//!
//! The actual detection/tracking model is an external black box: it receives a
//! frame and returns bounding boxes with class names, confidences and stable
//! tracking ids. Implementations are injected into the tracking element at
//! construction time so the tracker and classifier run in tests without a
//! real model.

mod stub;

pub use stub::ScriptedDetectionEngine;

use anyhow::Result;

use crate::frame::Frame;

/// Axis-aligned bounding box in pixel coordinates (x1, y1) top-left,
/// (x2, y2) bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 + self.x2) as f64 / 2.0,
            (self.y1 + self.y2) as f64 / 2.0,
        )
    }

    /// Box area, clamped so degenerate boxes contribute zero.
    pub fn area(&self) -> u64 {
        let w = (self.x2 - self.x1).max(0) as u64;
        let h = (self.y2 - self.y1).max(0) as u64;
        w * h
    }
}

/// One detection produced by the engine for a single frame.
#[derive(Clone, Debug)]
pub struct Observation {
    /// Stable tracking id assigned by the engine. The same physical object
    /// keeps its id across frames for as long as the engine tracks it.
    pub track_id: String,
    /// Lowercase-insensitive class label ("person", "car", ...).
    pub class_name: String,
    pub confidence: f32,
    pub bounds: BoundingBox,
}

/// Detection engine port.
///
/// Implementations own their confidence threshold and any model state; the
/// tracking element only sees the surviving observations.
pub trait DetectionEngine {
    /// Run detection on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Observation>>;
}
