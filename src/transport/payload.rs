//! Alert wire formats.
//!
//! Two shapes, because upstream detectors differ in whether they expose track
//! identity:
//!
//! - record form: one JSON object per qualifying detection, posted to
//!   `/api/wildDetection/detections`.
//! - batch form: one JSON object for the whole qualifying batch, posted to
//!   `/api/detections`.

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, Detection};

pub const RECORD_ENDPOINT: &str = "/api/wildDetection/detections";
pub const BATCH_ENDPOINT: &str = "/api/detections";

/// Which wire shape a session submits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadForm {
    #[default]
    Record,
    Batch,
}

/// Camera location metadata; every field is optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "locationName")]
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Per-detection alert record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub cctv_id: String,
    pub animal: String,
    /// Percentage, 0-100, two decimals.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
    pub behavior: String,
    pub distance: String,
    #[serde(rename = "locationName")]
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(rename = "videoUrl")]
    pub video_url: Option<String>,
    pub timestamp: String,
}

/// One detection inside a batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchDetection {
    pub class_name: String,
    /// Raw model confidence, 0-1.
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

/// Whole-batch alert.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionBatch {
    pub cctv_id: String,
    pub timestamp: String,
    pub detections: Vec<BatchDetection>,
    pub total: usize,
    /// `[height, width]` of the inference frame.
    pub frame_shape: Option<[u32; 2]>,
    #[serde(rename = "videoUrl", skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

/// The record handed to the alert sink. Built fresh for every submit.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AlertPayload {
    Record(DetectionRecord),
    Batch(DetectionBatch),
}

impl AlertPayload {
    pub fn record(
        camera_id: &str,
        detection: &Detection,
        location: &Location,
        video_url: Option<&str>,
        timestamp: &str,
    ) -> Self {
        AlertPayload::Record(DetectionRecord {
            cctv_id: camera_id.to_string(),
            animal: detection.class_name.clone(),
            confidence: confidence_percent(detection.confidence),
            track_id: detection.track_id,
            behavior: String::new(),
            distance: String::new(),
            location_name: location.name.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            video_url: video_url.map(str::to_string),
            timestamp: timestamp.to_string(),
        })
    }

    pub fn batch(
        camera_id: &str,
        detections: &[Detection],
        frame_shape: Option<[u32; 2]>,
        video_url: Option<&str>,
        timestamp: &str,
    ) -> Self {
        AlertPayload::Batch(DetectionBatch {
            cctv_id: camera_id.to_string(),
            timestamp: timestamp.to_string(),
            detections: detections
                .iter()
                .map(|d| BatchDetection {
                    class_name: d.class_name.clone(),
                    confidence: d.confidence,
                    bbox: d.bbox,
                    track_id: d.track_id,
                })
                .collect(),
            total: detections.len(),
            frame_shape,
            video_url: video_url.map(str::to_string),
        })
    }

    /// Backend path this payload is posted to.
    pub fn endpoint(&self) -> &'static str {
        match self {
            AlertPayload::Record(_) => RECORD_ENDPOINT,
            AlertPayload::Batch(_) => BATCH_ENDPOINT,
        }
    }

    /// Class names carried by this payload.
    pub fn class_names(&self) -> Vec<&str> {
        match self {
            AlertPayload::Record(r) => vec![r.animal.as_str()],
            AlertPayload::Batch(b) => b.detections.iter().map(|d| d.class_name.as_str()).collect(),
        }
    }
}

/// 0-1 confidence to a percentage rounded to two decimals.
pub fn confidence_percent(confidence: f32) -> f64 {
    (confidence as f64 * 10_000.0).round() / 100.0
}

/// Local time as ISO-8601 with offset.
pub fn timestamp_now() -> String {
    chrono::Local::now().to_rfc3339()
}
