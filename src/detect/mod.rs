//! Inference collaborator and detection normalization.
//!
//! Backends turn a frame into `RawDetection`s; `normalize` filters those into
//! `Detection`s by confidence, class list and value sanity.

mod backend;
mod backends;
mod normalize;
mod result;
mod tracker;

use anyhow::{anyhow, Context, Result};
use std::path::Path;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use normalize::{normalize, ClassFilter, DEFAULT_ANIMAL_CLASSES, DEFAULT_DENIED_CLASSES};
pub use result::{BoundingBox, Detection, RawDetection};
pub use tracker::{IouTracker, IouTrackerConfig};

use crate::config::DetectorSettings;

/// Build the backend named in the settings.
///
/// Runs once per session at startup. Any failure here (unknown backend,
/// unreadable model or labels) is fatal for the session.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
        "stub" => Box::new(StubBackend::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = settings
                .model_path
                .as_deref()
                .ok_or_else(|| anyhow!("detector.model_path is required for the tract backend"))?;
            let labels_path = settings
                .labels_path
                .as_deref()
                .ok_or_else(|| anyhow!("detector.labels_path is required for the tract backend"))?;
            let labels = load_labels(labels_path)?;
            Box::new(TractBackend::new(
                model_path,
                labels,
                settings.input_width,
                settings.input_height,
            )?)
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(anyhow!(
                "detector backend 'tract' requires the backend-tract feature"
            ))
        }
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    };

    let mut backend: Box<dyn DetectorBackend> =
        if settings.tracking && !backend.supports(DetectionCapability::Tracking) {
            Box::new(IouTracker::new(backend, IouTrackerConfig::default()))
        } else {
            backend
        };
    backend
        .warm_up()
        .with_context(|| format!("warm up detector backend '{}'", backend.name()))?;
    Ok(backend)
}

/// Read a label file: one class name per line, blank lines ignored.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("labels file {} is empty", path.display()));
    }
    Ok(labels)
}
