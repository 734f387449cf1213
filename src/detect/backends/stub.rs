use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Scripted backend for tests and dry runs.
///
/// Each `infer` call pops the next batch from the script; once the script is
/// exhausted every frame yields no detections.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<RawDetection>>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: script.into(),
            calls: 0,
        }
    }

    /// Number of frames this backend has been asked to process.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn infer(&mut self, _frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        let batch = self.script.pop_front().unwrap_or_default();
        Ok(batch
            .into_iter()
            .filter(|d| d.confidence.is_nan() || d.confidence >= confidence_threshold)
            .collect())
    }
}
