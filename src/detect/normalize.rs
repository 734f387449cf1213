//! Detection normalizer.
//!
//! Turns raw inference output into `Detection` records: confidence at or above
//! the threshold, class admitted by the configured filter, finite values only.
//! Pure and stateless; a malformed entry is dropped without affecting its
//! siblings in the same batch.

use std::collections::BTreeSet;

use crate::detect::result::{Detection, RawDetection};

/// Classes the animal model alerts on.
pub const DEFAULT_ANIMAL_CLASSES: [&str; 4] = ["porcupine", "animal_redfox", "hyena", "tiger"];

/// Classes excluded by the general-purpose model.
pub const DEFAULT_DENIED_CLASSES: [&str; 2] = ["human", "humans"];

/// Domain class filter. Class names are compared case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassFilter {
    /// Only these classes pass.
    Allow(BTreeSet<String>),
    /// Everything except these classes passes.
    Deny(BTreeSet<String>),
}

impl ClassFilter {
    pub fn allow<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ClassFilter::Allow(lowercase_set(classes))
    }

    pub fn deny<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ClassFilter::Deny(lowercase_set(classes))
    }

    /// The animal allow-list.
    pub fn animals() -> Self {
        Self::allow(DEFAULT_ANIMAL_CLASSES)
    }

    /// Everything but humans.
    pub fn non_human() -> Self {
        Self::deny(DEFAULT_DENIED_CLASSES)
    }

    pub fn admits(&self, class_name: &str) -> bool {
        let class_name = class_name.trim().to_lowercase();
        match self {
            ClassFilter::Allow(classes) => classes.contains(&class_name),
            ClassFilter::Deny(classes) => !classes.contains(&class_name),
        }
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::animals()
    }
}

fn lowercase_set<I, S>(classes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    classes
        .into_iter()
        .map(|c| c.as_ref().trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Filter raw inference output into detections, preserving input order.
pub fn normalize(raw: &[RawDetection], threshold: f32, filter: &ClassFilter) -> Vec<Detection> {
    raw.iter()
        .filter_map(|r| normalize_one(r, threshold, filter))
        .collect()
}

fn normalize_one(raw: &RawDetection, threshold: f32, filter: &ClassFilter) -> Option<Detection> {
    let bbox = raw.bbox();
    if !raw.confidence.is_finite() || !bbox.is_finite() {
        log::debug!("discarding non-finite detection for class {}", raw.class_name);
        return None;
    }
    if !(0.0..=1.0).contains(&raw.confidence) {
        log::debug!(
            "discarding detection with out-of-range confidence {} for class {}",
            raw.confidence,
            raw.class_name
        );
        return None;
    }
    if raw.confidence < threshold || !filter.admits(&raw.class_name) {
        return None;
    }
    Some(Detection {
        track_id: raw.track_id,
        class_name: raw.class_name.clone(),
        confidence: raw.confidence,
        bbox,
    })
}
