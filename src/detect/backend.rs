use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Capabilities a backend may offer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    ObjectDetection,
    /// Detections carry identities that persist across frames.
    Tracking,
}

/// Inference collaborator.
///
/// Given a frame and a confidence threshold, returns the objects found in it.
/// Each session owns its own backend instance; backends are never shared
/// between camera streams.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run inference on a frame.
    ///
    /// Implementations may pre-filter with `confidence_threshold`; the
    /// normalizer applies it again regardless.
    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once before the session starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        (**self).supports(capability)
    }

    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        (**self).infer(frame, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
