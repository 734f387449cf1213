//! Alert dispatcher.
//!
//! One dispatch cycle per qualifying batch:
//!
//! ```text
//! QUALIFY -> (empty) -> DONE
//! QUALIFY -> EXTRACT_CLIP -> UPLOAD (optional) -> SUBMIT -> CLEANUP -> DONE
//! ```
//!
//! Nothing in a cycle is fatal. A missing clip or a failed upload means the
//! alert goes out without media; a failed submit is counted and not retried.
//! The temporary clip is removed on every path once it exists.

use std::path::Path;

use crate::clip::{ClipExtractor, TempClip};
use crate::detect::Detection;
use crate::frame::Frame;
use crate::stats::SessionStats;
use crate::transport::{
    timestamp_now, AlertPayload, AlertSink, Location, MediaUploader, PayloadForm,
};

/// What one cycle did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub clip_frames: Option<usize>,
    pub video_url: Option<String>,
    pub submitted: usize,
    pub accepted: usize,
    pub rejected_statuses: Vec<Option<u16>>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.submitted == 0
    }
}

pub struct AlertDispatcher {
    camera_id: String,
    location: Location,
    form: PayloadForm,
    extractor: ClipExtractor,
    uploader: Option<Box<dyn MediaUploader>>,
    sink: Box<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(
        camera_id: &str,
        location: Location,
        form: PayloadForm,
        extractor: ClipExtractor,
        uploader: Option<Box<dyn MediaUploader>>,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            location,
            form,
            extractor,
            uploader,
            sink,
        }
    }

    pub fn form(&self) -> PayloadForm {
        self.form
    }

    /// Run one cycle for `qualifying` detections against the ring snapshot.
    ///
    /// `frame_shape` is the `[height, width]` of the inference frame, carried
    /// by the batch form.
    pub fn dispatch(
        &mut self,
        qualifying: &[Detection],
        snapshot: &[&Frame],
        frame_shape: Option<[u32; 2]>,
        stats: &mut SessionStats,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if qualifying.is_empty() {
            return report;
        }

        let clip = self.extractor.extract(snapshot, &self.camera_id);
        if clip.is_none() && !snapshot.is_empty() {
            stats.record_clip_failure();
        }
        report.clip_frames = clip.as_ref().map(TempClip::frame_count);

        report.video_url = clip
            .as_ref()
            .and_then(|clip| self.upload(clip.path(), stats));

        let timestamp = timestamp_now();
        let payloads: Vec<AlertPayload> = match self.form {
            PayloadForm::Record => qualifying
                .iter()
                .map(|detection| {
                    AlertPayload::record(
                        &self.camera_id,
                        detection,
                        &self.location,
                        report.video_url.as_deref(),
                        &timestamp,
                    )
                })
                .collect(),
            PayloadForm::Batch => vec![AlertPayload::batch(
                &self.camera_id,
                qualifying,
                frame_shape,
                report.video_url.as_deref(),
                &timestamp,
            )],
        };

        for payload in &payloads {
            report.submitted += 1;
            let outcome = self.sink.submit(payload);
            if outcome.success {
                report.accepted += 1;
                stats.record_alert(payload);
            } else {
                stats.record_submit_failure();
                report.rejected_statuses.push(outcome.status);
                match outcome.status {
                    Some(status) => log::warn!(
                        "{}: alert rejected by backend with status {}",
                        self.camera_id,
                        status
                    ),
                    None => log::error!("{}: alert not delivered", self.camera_id),
                }
            }
        }

        if report.accepted > 0 {
            log::info!(
                "{}: {} of {} alert(s) accepted",
                self.camera_id,
                report.accepted,
                report.submitted
            );
        }

        if let Some(clip) = clip {
            if let Err(e) = clip.close() {
                log::warn!("{}: {:#}", self.camera_id, e);
            }
        }
        report
    }

    fn upload(&mut self, path: &Path, stats: &mut SessionStats) -> Option<String> {
        let uploader = self.uploader.as_mut()?;
        let url = uploader.upload(path);
        if url.is_none() {
            stats.record_upload_failure();
        }
        url
    }
}
