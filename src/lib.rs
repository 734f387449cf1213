//! Wildlife Sentinel
//!
//! Live camera monitoring that turns object detections into alerts. Frames are
//! pulled from a camera, sampled through a detector, filtered down to the
//! detections worth telling someone about, and sent to a backend together with
//! a short clip of what the camera saw.
//!
//! # Architecture
//!
//! Each camera runs as an isolated session:
//!
//! 1. **Frame ring**: every captured frame is copied into a bounded ring that
//!    holds the last few seconds of video.
//! 2. **Normalizer**: sampled frames go through the detector; results are
//!    filtered by confidence, class list and value sanity.
//! 3. **Novelty tracker**: suppresses repeats, per track id (cooldown) or per
//!    camera (expiry window).
//! 4. **Dispatcher**: cuts a clip from the ring, uploads it, submits the alert
//!    and removes the temporary clip whatever happened.
//! 5. **Supervisor**: drives the loop and reconnects on read failures.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `FrameRing`
//! - `ingest`: frame sources (RTSP/HTTP streams, local files, `stub://`)
//! - `detect`: detector backends, IoU tracker, normalizer
//! - `novelty`: cooldown / camera-window strategies
//! - `clip`: clip encoders and extraction
//! - `transport`: alert payloads, alert sink, media upload
//! - `dispatch`, `stats`, `supervisor`, `config`

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod clip;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod frame;
pub mod ingest;
pub mod novelty;
pub mod stats;
pub mod supervisor;
pub mod transport;

pub use clip::{ClipEncoder, ClipExtractor, FfmpegCliEncoder, MjpegEncoder, TempClip};
pub use config::{CameraSettings, DetectorSettings, SentinelConfig};
pub use detect::{
    BoundingBox, ClassFilter, DetectionCapability, Detection, DetectorBackend, RawDetection,
    StubBackend,
};
pub use dispatch::{AlertDispatcher, DispatchReport};
pub use frame::{Frame, FrameRing};
pub use ingest::{FileSource, FrameSource, RtspSource, SourceStats};
pub use novelty::{NoveltyStrategy, NoveltyTracker};
pub use stats::{SessionReport, SessionStats};
pub use supervisor::{
    sampling_interval, SessionContext, SessionOptions, SessionSettings, StreamSupervisor,
};
pub use transport::{AlertPayload, AlertSink, Location, MediaUploader, PayloadForm, SubmitOutcome};

/// Check a camera id against `^[A-Za-z0-9_.:-]{1,64}$`.
///
/// Camera ids end up in file names and backend records, so nothing else is
/// accepted.
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    // Compile once for hot paths.
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").unwrap());

    if !re.is_match(camera_id) {
        return Err(anyhow!(
            "camera id '{}' must match ^[A-Za-z0-9_.:-]{{1,64}}$",
            camera_id
        ));
    }
    Ok(())
}
