//! Novelty tracking: decides which detections are new enough to alert on.
//!
//! One tracker, two strategies:
//!
//! - `TrackCooldown`: per track id. A track qualifies on first sight and again
//!   once `cooldown` has elapsed since its last alert.
//! - `CameraWindow`: per camera, for backends without track identities. A
//!   non-empty batch qualifies as a whole only when no alert for that camera is
//!   still inside the `expiry` window.
//!
//! Time is supplied by the caller as a monotonic `Instant`, so the decision is
//! deterministic for a given sequence of calls.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::detect::Detection;

/// Default hard cap on remembered track identities.
pub const DEFAULT_MAX_TRACKS: usize = 4096;

/// Strategy selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoveltyStrategy {
    TrackCooldown { cooldown: Duration, max_tracks: usize },
    CameraWindow { expiry: Duration },
}

impl NoveltyStrategy {
    pub fn track_cooldown(cooldown: Duration) -> Self {
        NoveltyStrategy::TrackCooldown {
            cooldown,
            max_tracks: DEFAULT_MAX_TRACKS,
        }
    }

    pub fn camera_window(expiry: Duration) -> Self {
        NoveltyStrategy::CameraWindow { expiry }
    }
}

/// Stateful novelty filter for one session.
pub enum NoveltyTracker {
    TrackCooldown(TrackCooldownTable),
    CameraWindow(CameraAlertCache),
}

impl NoveltyTracker {
    pub fn new(strategy: NoveltyStrategy) -> Self {
        match strategy {
            NoveltyStrategy::TrackCooldown {
                cooldown,
                max_tracks,
            } => NoveltyTracker::TrackCooldown(TrackCooldownTable::new(cooldown, max_tracks)),
            NoveltyStrategy::CameraWindow { expiry } => {
                NoveltyTracker::CameraWindow(CameraAlertCache::new(expiry))
            }
        }
    }

    /// Return the qualifying subset of `detections` (possibly empty).
    pub fn evaluate(
        &mut self,
        camera_id: &str,
        detections: &[Detection],
        now: Instant,
    ) -> Vec<Detection> {
        match self {
            NoveltyTracker::TrackCooldown(table) => table.evaluate(detections, now),
            NoveltyTracker::CameraWindow(cache) => cache.evaluate(camera_id, detections, now),
        }
    }
}

// ----------------------------------------------------------------------------
// Track-identity mode
// ----------------------------------------------------------------------------

/// Last alert instant per track identity.
///
/// Detections without a track id share one slot. Entries older than the
/// cooldown are pruned on every evaluation: such an entry would qualify anyway,
/// so pruning never changes a decision. `max_tracks` bounds memory when many
/// identities alert within a single cooldown window.
pub struct TrackCooldownTable {
    cooldown: Duration,
    max_tracks: usize,
    last_alert: HashMap<Option<i64>, Instant>,
}

impl TrackCooldownTable {
    pub fn new(cooldown: Duration, max_tracks: usize) -> Self {
        Self {
            cooldown,
            max_tracks: max_tracks.max(1),
            last_alert: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, detections: &[Detection], now: Instant) -> Vec<Detection> {
        self.prune(now);

        let mut qualifying = Vec::new();
        for detection in detections {
            let key = detection.track_id;
            let is_new = match self.last_alert.get(&key) {
                None => true,
                Some(last) => now.saturating_duration_since(*last) > self.cooldown,
            };
            if is_new {
                self.record(key, now);
                qualifying.push(detection.clone());
            }
        }
        qualifying
    }

    pub fn len(&self) -> usize {
        self.last_alert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alert.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.last_alert
            .retain(|_, last| now.saturating_duration_since(*last) <= cooldown);
    }

    fn record(&mut self, key: Option<i64>, now: Instant) {
        if !self.last_alert.contains_key(&key) && self.last_alert.len() >= self.max_tracks {
            let oldest = self
                .last_alert
                .iter()
                .min_by_key(|(_, last)| **last)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                self.last_alert.remove(&oldest);
            }
        }
        self.last_alert.insert(key, now);
    }
}

// ----------------------------------------------------------------------------
// Camera-window mode
// ----------------------------------------------------------------------------

/// Recent alerted batches per camera.
pub struct CameraAlertCache {
    expiry: Duration,
    entries: HashMap<String, Vec<(Instant, Vec<Detection>)>>,
}

impl CameraAlertCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            entries: HashMap::new(),
        }
    }

    pub fn evaluate(
        &mut self,
        camera_id: &str,
        detections: &[Detection],
        now: Instant,
    ) -> Vec<Detection> {
        let expiry = self.expiry;
        let cached = self.entries.entry(camera_id.to_string()).or_default();
        cached.retain(|(at, _)| now.saturating_duration_since(*at) < expiry);

        if detections.is_empty() || !cached.is_empty() {
            return Vec::new();
        }

        cached.push((now, detections.to_vec()));
        detections.to_vec()
    }

    /// Entries still cached for a camera (not pruned until the next evaluation).
    pub fn cached(&self, camera_id: &str) -> usize {
        self.entries.get(camera_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(class: &str, track: Option<i64>) -> Detection {
        Detection {
            track_id: track,
            class_name: class.to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn track_qualifies_on_first_sight_only_within_cooldown() {
        let mut tracker = NoveltyTracker::new(NoveltyStrategy::track_cooldown(secs(20)));
        let t0 = Instant::now();
        let tiger = [det("tiger", Some(5))];

        assert_eq!(tracker.evaluate("cam", &tiger, t0).len(), 1);
        assert!(tracker.evaluate("cam", &tiger, t0 + secs(3)).is_empty());
        assert!(tracker.evaluate("cam", &tiger, t0 + secs(20)).is_empty());
        assert_eq!(tracker.evaluate("cam", &tiger, t0 + secs(21)).len(), 1);
    }

    #[test]
    fn suppressed_sighting_does_not_extend_cooldown() {
        let mut table = TrackCooldownTable::new(secs(10), DEFAULT_MAX_TRACKS);
        let t0 = Instant::now();
        let tiger = [det("tiger", Some(1))];

        assert_eq!(table.evaluate(&tiger, t0).len(), 1);
        assert!(table.evaluate(&tiger, t0 + secs(9)).is_empty());
        assert_eq!(table.evaluate(&tiger, t0 + secs(11)).len(), 1);
    }

    #[test]
    fn distinct_tracks_are_independent() {
        let mut table = TrackCooldownTable::new(secs(20), DEFAULT_MAX_TRACKS);
        let t0 = Instant::now();

        assert_eq!(table.evaluate(&[det("tiger", Some(1))], t0).len(), 1);
        let batch = [det("tiger", Some(1)), det("hyena", Some(2))];
        let out = table.evaluate(&batch, t0 + secs(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].track_id, Some(2));
    }

    #[test]
    fn untracked_detections_share_a_slot() {
        let mut table = TrackCooldownTable::new(secs(20), DEFAULT_MAX_TRACKS);
        let t0 = Instant::now();
        let batch = [det("tiger", None), det("hyena", None)];

        let out = table.evaluate(&batch, t0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_name, "tiger");
    }

    #[test]
    fn expired_entries_are_pruned() {
        let mut table = TrackCooldownTable::new(secs(5), DEFAULT_MAX_TRACKS);
        let t0 = Instant::now();
        for id in 0..10 {
            table.evaluate(&[det("tiger", Some(id))], t0);
        }
        assert_eq!(table.len(), 10);
        table.evaluate(&[], t0 + secs(6));
        assert!(table.is_empty());
    }

    #[test]
    fn table_is_capped_by_evicting_oldest() {
        let mut table = TrackCooldownTable::new(secs(60), 3);
        let t0 = Instant::now();
        for id in 0..4 {
            table.evaluate(&[det("tiger", Some(id))], t0 + secs(id as u64));
        }
        assert_eq!(table.len(), 3);
        // Track 0 was evicted, so it is treated as new again.
        assert_eq!(table.evaluate(&[det("tiger", Some(0))], t0 + secs(5)).len(), 1);
        assert!(table.evaluate(&[det("tiger", Some(3))], t0 + secs(5)).is_empty());
    }

    #[test]
    fn camera_window_alerts_once_per_expiry() {
        let mut tracker = NoveltyTracker::new(NoveltyStrategy::camera_window(secs(30)));
        let t0 = Instant::now();
        let batch = [det("tiger", None), det("hyena", None)];

        assert_eq!(tracker.evaluate("cctv_001", &batch, t0).len(), 2);
        assert!(tracker.evaluate("cctv_001", &batch, t0 + secs(10)).is_empty());
        assert!(tracker.evaluate("cctv_001", &batch, t0 + secs(29)).is_empty());
        assert_eq!(tracker.evaluate("cctv_001", &batch, t0 + secs(30)).len(), 2);
    }

    #[test]
    fn camera_window_ignores_empty_batches() {
        let mut cache = CameraAlertCache::new(secs(30));
        let t0 = Instant::now();

        assert!(cache.evaluate("cam", &[], t0).is_empty());
        assert_eq!(cache.cached("cam"), 0);
        assert_eq!(cache.evaluate("cam", &[det("tiger", None)], t0 + secs(1)).len(), 1);
        assert_eq!(cache.cached("cam"), 1);
    }

    #[test]
    fn camera_window_is_per_camera() {
        let mut cache = CameraAlertCache::new(secs(30));
        let t0 = Instant::now();
        let batch = [det("tiger", None)];

        assert_eq!(cache.evaluate("a", &batch, t0).len(), 1);
        assert_eq!(cache.evaluate("b", &batch, t0).len(), 1);
        assert!(cache.evaluate("a", &batch, t0 + secs(1)).is_empty());
    }
}
