//! Per-session counters and the end-of-session report.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::transport::AlertPayload;

/// Running counters for one session. Only ever incremented.
#[derive(Clone, Debug)]
pub struct SessionStats {
    started_at: Instant,
    frames: u64,
    qualifying_detections: u64,
    alerts_sent: u64,
    class_counts: BTreeMap<String, u64>,
    read_failures: u64,
    reconnects: u64,
    inference_failures: u64,
    clip_failures: u64,
    upload_failures: u64,
    submit_failures: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::started(Instant::now())
    }

    pub fn started(started_at: Instant) -> Self {
        Self {
            started_at,
            frames: 0,
            qualifying_detections: 0,
            alerts_sent: 0,
            class_counts: BTreeMap::new(),
            read_failures: 0,
            reconnects: 0,
            inference_failures: 0,
            clip_failures: 0,
            upload_failures: 0,
            submit_failures: 0,
        }
    }

    /// Count a captured frame; returns the new frame counter.
    pub fn record_frame(&mut self) -> u64 {
        self.frames += 1;
        self.frames
    }

    pub fn record_qualifying(&mut self, count: usize) {
        self.qualifying_detections += count as u64;
    }

    /// Count a submit the backend accepted, crediting every class it carried.
    pub fn record_alert(&mut self, payload: &AlertPayload) {
        self.alerts_sent += 1;
        for class_name in payload.class_names() {
            *self.class_counts.entry(class_name.to_string()).or_default() += 1;
        }
    }

    pub fn record_read_failure(&mut self) {
        self.read_failures += 1;
    }

    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    pub fn record_inference_failure(&mut self) {
        self.inference_failures += 1;
    }

    pub fn record_clip_failure(&mut self) {
        self.clip_failures += 1;
    }

    pub fn record_upload_failure(&mut self) {
        self.upload_failures += 1;
    }

    pub fn record_submit_failure(&mut self) {
        self.submit_failures += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent
    }

    pub fn qualifying_detections(&self) -> u64 {
        self.qualifying_detections
    }

    pub fn class_count(&self, class_name: &str) -> u64 {
        self.class_counts.get(class_name).copied().unwrap_or(0)
    }

    /// Read-only snapshot for reporting.
    pub fn snapshot(&self, camera_id: &str) -> SessionReport {
        self.snapshot_at(camera_id, Instant::now())
    }

    pub fn snapshot_at(&self, camera_id: &str, now: Instant) -> SessionReport {
        SessionReport {
            camera_id: camera_id.to_string(),
            runtime: now.saturating_duration_since(self.started_at),
            frames: self.frames,
            qualifying_detections: self.qualifying_detections,
            alerts_sent: self.alerts_sent,
            class_counts: self.class_counts.clone(),
            read_failures: self.read_failures,
            reconnects: self.reconnects,
            inference_failures: self.inference_failures,
            clip_failures: self.clip_failures,
            upload_failures: self.upload_failures,
            submit_failures: self.submit_failures,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen copy of `SessionStats` taken when a session ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub camera_id: String,
    pub runtime: Duration,
    pub frames: u64,
    pub qualifying_detections: u64,
    pub alerts_sent: u64,
    pub class_counts: BTreeMap<String, u64>,
    pub read_failures: u64,
    pub reconnects: u64,
    pub inference_failures: u64,
    pub clip_failures: u64,
    pub upload_failures: u64,
    pub submit_failures: u64,
}

impl SessionReport {
    pub fn average_fps(&self) -> f64 {
        let secs = self.runtime.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== session summary: {} ====", self.camera_id)?;
        writeln!(f, "runtime:               {:.1}s", self.runtime.as_secs_f64())?;
        writeln!(f, "frames processed:      {}", self.frames)?;
        writeln!(f, "average fps:           {:.2}", self.average_fps())?;
        writeln!(f, "qualifying detections: {}", self.qualifying_detections)?;
        writeln!(f, "alerts sent:           {}", self.alerts_sent)?;
        if self.class_counts.is_empty() {
            writeln!(f, "alerts by class:       none")?;
        } else {
            writeln!(f, "alerts by class:")?;
            for (class_name, count) in &self.class_counts {
                writeln!(f, "  {:<20} {}", class_name, count)?;
            }
        }
        writeln!(
            f,
            "failures:              read={} inference={} clip={} upload={} submit={}",
            self.read_failures,
            self.inference_failures,
            self.clip_failures,
            self.upload_failures,
            self.submit_failures
        )?;
        writeln!(f, "reconnects:            {}", self.reconnects)?;
        write!(
            f,
            "platform:              {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    }
}
