//! Greedy IoU tracker.
//!
//! Wraps a detection-only backend and assigns persistent track ids, so the
//! track-cooldown novelty mode works with models that have no tracker of their
//! own. Matching is greedy by IoU within the same class; a track coasts through
//! short detection gaps and is dropped after `max_missed` frames.

use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct IouTrackerConfig {
    /// Minimum IoU to continue an existing track.
    pub min_iou: f32,
    /// Frames a track survives without a match.
    pub max_missed: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_missed: 15,
        }
    }
}

struct Track {
    id: i64,
    class_name: String,
    bbox: BoundingBox,
    missed: u32,
}

pub struct IouTracker<B> {
    inner: B,
    config: IouTrackerConfig,
    tracks: Vec<Track>,
    next_id: i64,
}

impl<B: DetectorBackend> IouTracker<B> {
    pub fn new(inner: B, config: IouTrackerConfig) -> Self {
        Self {
            inner,
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Number of live tracks.
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    fn assign(&mut self, detections: &mut [RawDetection]) {
        let mut matched = vec![false; self.tracks.len()];

        // Highest confidence claims a track first.
        let mut order: Vec<usize> = (0..detections.len()).collect();
        order.sort_by(|&a, &b| detections[b].confidence.total_cmp(&detections[a].confidence));

        for idx in order {
            let det = &mut detections[idx];
            if det.track_id.is_some() {
                continue;
            }
            let bbox = det.bbox();
            let best = self
                .tracks
                .iter()
                .enumerate()
                .filter(|(i, t)| !matched[*i] && t.class_name == det.class_name)
                .map(|(i, t)| (i, t.bbox.iou(&bbox)))
                .filter(|(_, iou)| *iou >= self.config.min_iou)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match best {
                Some((i, _)) => {
                    matched[i] = true;
                    let track = &mut self.tracks[i];
                    track.bbox = bbox;
                    track.missed = 0;
                    det.track_id = Some(track.id);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        class_name: det.class_name.clone(),
                        bbox,
                        missed: 0,
                    });
                    matched.push(true);
                    det.track_id = Some(id);
                }
            }
        }

        for (track, hit) in self.tracks.iter_mut().zip(matched.iter()) {
            if !hit {
                track.missed += 1;
            }
        }
        let max_missed = self.config.max_missed;
        self.tracks.retain(|t| t.missed <= max_missed);
    }
}

impl<B: DetectorBackend> DetectorBackend for IouTracker<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Tracking) || self.inner.supports(capability)
    }

    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let mut detections = self.inner.infer(frame, confidence_threshold)?;
        self.assign(&mut detections);
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}
