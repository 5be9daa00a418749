use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::{DetectionEngine, Observation};
use crate::frame::Frame;

/// Scripted engine for tests and for running the daemon without a model.
///
/// Returns queued observation batches in order, then empty batches forever.
pub struct ScriptedDetectionEngine {
    batches: VecDeque<Vec<Observation>>,
}

impl ScriptedDetectionEngine {
    pub fn new() -> Self {
        Self {
            batches: VecDeque::new(),
        }
    }

    /// Queue the batch returned by the next `detect` call.
    pub fn push_batch(&mut self, batch: Vec<Observation>) {
        self.batches.push_back(batch);
    }
}

impl Default for ScriptedDetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionEngine for ScriptedDetectionEngine {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Observation>> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
