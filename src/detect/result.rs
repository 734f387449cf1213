use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the inference frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn from_xyxy(xyxy: [f32; 4]) -> Self {
        Self::new(xyxy[0], xyxy[1], xyxy[2], xyxy[3])
    }

    pub fn is_finite(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0) * (self.y_max - self.y_min).max(0.0)
    }

    /// Intersection over union; 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// A filtered detection, as consumed by the novelty tracker and dispatcher.
///
/// Produced fresh per processed frame and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub track_id: Option<i64>,
    pub class_name: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Unfiltered inference output for one object.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]`
    pub xyxy: [f32; 4],
    /// Persistent identity when the backend tracks across frames.
    pub track_id: Option<i64>,
}

impl RawDetection {
    pub fn new(class_name: &str, confidence: f32, xyxy: [f32; 4]) -> Self {
        Self {
            class_id: 0,
            class_name: class_name.to_string(),
            confidence,
            xyxy,
            track_id: None,
        }
    }

    pub fn with_track(mut self, track_id: i64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_xyxy(self.xyxy)
    }
}
