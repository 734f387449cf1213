//! End-to-end session scenarios with scripted collaborators.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use wildlife_sentinel::detect::{DetectionCapability, RawDetection};
use wildlife_sentinel::ingest::SourceStats;
use wildlife_sentinel::{
    AlertDispatcher, AlertPayload, AlertSink, ClassFilter, ClipExtractor, DetectorBackend, Frame,
    FrameSource, Location, MediaUploader, MjpegEncoder, NoveltyStrategy, PayloadForm,
    SessionContext, SessionSettings, StreamSupervisor, StubBackend, SubmitOutcome,
};

// ---- Scripted collaborators ----

#[derive(Default)]
struct SourceLog {
    opens: u32,
    releases: u32,
    open_times: Vec<Instant>,
}

/// Replays a script of frames and read failures.
struct ScriptedSource {
    script: VecDeque<Result<Frame>>,
    log: Arc<Mutex<SourceLog>>,
    frames: u64,
    native_fps: f64,
}

impl ScriptedSource {
    fn new(script: Vec<Result<Frame>>, native_fps: f64) -> (Self, Arc<Mutex<SourceLog>>) {
        let log = Arc::new(Mutex::new(SourceLog::default()));
        (
            Self {
                script: script.into(),
                log: log.clone(),
                frames: 0,
                native_fps,
            },
            log,
        )
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.opens += 1;
        log.open_times.push(Instant::now());
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let next = self
            .script
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("script exhausted")));
        if next.is_ok() {
            self.frames += 1;
        }
        next
    }

    fn release(&mut self) {
        self.log.lock().unwrap().releases += 1;
    }

    fn native_fps(&self) -> Option<f64> {
        Some(self.native_fps)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames,
            url: "scripted://".to_string(),
        }
    }
}

struct RecordingSink {
    status: u16,
    payloads: Arc<Mutex<Vec<AlertPayload>>>,
}

impl AlertSink for RecordingSink {
    fn submit(&mut self, payload: &AlertPayload) -> SubmitOutcome {
        self.payloads.lock().unwrap().push(payload.clone());
        SubmitOutcome::from_status(self.status)
    }
}

/// One clip handed to the uploader.
struct UploadedClip {
    path: PathBuf,
    existed: bool,
    bytes: Vec<u8>,
}

/// Remembers every clip it was given, with its contents at upload time.
struct SpyUploader {
    url: Option<String>,
    seen: Arc<Mutex<Vec<UploadedClip>>>,
}

impl MediaUploader for SpyUploader {
    fn upload(&mut self, path: &Path) -> Option<String> {
        self.seen.lock().unwrap().push(UploadedClip {
            path: path.to_path_buf(),
            existed: path.exists(),
            bytes: std::fs::read(path).unwrap_or_default(),
        });
        self.url.clone()
    }
}

/// Scripted detector that remembers the capture instant of every frame it saw.
struct InferenceLog {
    inner: StubBackend,
    seen: Arc<Mutex<Vec<Instant>>>,
}

impl DetectorBackend for InferenceLog {
    fn name(&self) -> &'static str {
        "inference-log"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        self.inner.supports(capability)
    }

    fn infer(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<RawDetection>> {
        self.seen.lock().unwrap().push(frame.captured_at);
        self.inner.infer(frame, threshold)
    }
}

struct FailingDetector;

impl DetectorBackend for FailingDetector {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn supports(&self, _capability: DetectionCapability) -> bool {
        false
    }

    fn infer(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<RawDetection>> {
        Err(anyhow!("model crashed"))
    }
}

// ---- Harness ----

struct Pipeline {
    supervisor: StreamSupervisor,
    source_log: Arc<Mutex<SourceLog>>,
    payloads: Arc<Mutex<Vec<AlertPayload>>>,
    uploads: Arc<Mutex<Vec<UploadedClip>>>,
    clip_dir: tempfile::TempDir,
}

struct Scenario {
    script: Vec<Result<Frame>>,
    detector: Box<dyn DetectorBackend>,
    novelty: NoveltyStrategy,
    form: PayloadForm,
    status: u16,
    upload_url: Option<&'static str>,
    reconnect_delay: Duration,
    native_fps: f64,
}

impl Scenario {
    fn new(script: Vec<Result<Frame>>, detections: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script,
            detector: Box::new(StubBackend::scripted(detections)),
            novelty: NoveltyStrategy::track_cooldown(Duration::from_secs(20)),
            form: PayloadForm::Record,
            status: 201,
            upload_url: Some("https://cdn.example/clip.mjpeg"),
            reconnect_delay: Duration::from_millis(20),
            native_fps: 10.0,
        }
    }
}

fn pipeline(scenario: Scenario) -> Pipeline {
    let clip_dir = tempfile::tempdir().unwrap();
    let (source, source_log) = ScriptedSource::new(scenario.script, scenario.native_fps);
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let uploads = Arc::new(Mutex::new(Vec::new()));

    let extractor = ClipExtractor::new(
        Box::new(MjpegEncoder::default()),
        10,
        clip_dir.path().to_path_buf(),
    );
    let dispatcher = AlertDispatcher::new(
        "aniresq_cam_1",
        Location {
            name: Some("Forest Zone 1".to_string()),
            latitude: Some(12.9716),
            longitude: Some(77.5946),
        },
        scenario.form,
        extractor,
        Some(Box::new(SpyUploader {
            url: scenario.upload_url.map(str::to_string),
            seen: uploads.clone(),
        })),
        Box::new(RecordingSink {
            status: scenario.status,
            payloads: payloads.clone(),
        }),
    );

    let context = SessionContext {
        camera_id: "aniresq_cam_1".to_string(),
        source: Box::new(source),
        detector: scenario.detector,
        dispatcher,
        settings: SessionSettings {
            confidence: 0.5,
            classes: ClassFilter::animals(),
            inference_width: 16,
            inference_height: 12,
            novelty: scenario.novelty,
            ring_capacity: 4,
            target_fps: 10.0,
            fallback_native_fps: 10.0,
            reconnect_delay: scenario.reconnect_delay,
        },
    };

    Pipeline {
        supervisor: StreamSupervisor::new(context),
        source_log,
        payloads,
        uploads,
        clip_dir,
    }
}

fn frame_at(base: Instant, offset: Duration) -> Result<Frame> {
    let mut frame = Frame::filled(32, 24, 90)?;
    frame.captured_at = base + offset;
    Ok(frame)
}

fn tiger(track: i64) -> RawDetection {
    RawDetection::new("tiger", 0.87, [2.0, 2.0, 10.0, 10.0]).with_track(track)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

// ---- Scenarios ----

#[test]
fn scenario_a_new_track_is_alerted() {
    let t0 = Instant::now();
    let mut p = pipeline(Scenario::new(
        vec![frame_at(t0, secs(0))],
        vec![vec![tiger(5)]],
    ));

    let report = p.supervisor.run(&AtomicBool::new(false), Some(1));

    assert_eq!(report.frames, 1);
    assert_eq!(report.qualifying_detections, 1);
    assert_eq!(report.alerts_sent, 1);
    assert_eq!(report.class_counts.get("tiger"), Some(&1));

    let payloads = p.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    let json = serde_json::to_value(&payloads[0]).unwrap();
    assert_eq!(json["cctv_id"], "aniresq_cam_1");
    assert_eq!(json["animal"], "tiger");
    assert_eq!(json["confidence"], 87.0);
    assert_eq!(json["track_id"], 5);
    assert_eq!(json["locationName"], "Forest Zone 1");
    assert_eq!(json["videoUrl"], "https://cdn.example/clip.mjpeg");
}

#[test]
fn scenario_b_same_track_within_cooldown_is_suppressed() {
    let t0 = Instant::now();
    let mut p = pipeline(Scenario::new(
        vec![
            frame_at(t0, secs(0)),
            frame_at(t0, secs(3)),
            frame_at(t0, secs(21)),
        ],
        vec![vec![tiger(5)], vec![tiger(5)], vec![tiger(5)]],
    ));

    let report = p.supervisor.run(&AtomicBool::new(false), Some(3));

    assert_eq!(report.frames, 3);
    // Frame at +3s is suppressed; +21s is past the 20s cooldown.
    assert_eq!(report.alerts_sent, 2);
    assert_eq!(p.payloads.lock().unwrap().len(), 2);
}

#[test]
fn scenario_b_suppression_leaves_stats_untouched() {
    let t0 = Instant::now();
    let mut p = pipeline(Scenario::new(
        vec![frame_at(t0, secs(0)), frame_at(t0, secs(3))],
        vec![vec![tiger(5)], vec![tiger(5)]],
    ));

    let report = p.supervisor.run(&AtomicBool::new(false), Some(2));
    assert_eq!(report.alerts_sent, 1);
    assert_eq!(report.qualifying_detections, 1);
}

#[test]
fn scenario_c_read_failure_reconnects_and_keeps_counting() {
    let t0 = Instant::now();
    let delay = Duration::from_millis(40);
    let mut scenario = Scenario::new(
        vec![
            frame_at(t0, secs(0)),
            Err(anyhow!("stream dropped")),
            frame_at(t0, secs(1)),
            frame_at(t0, secs(2)),
        ],
        vec![vec![tiger(1)], vec![], vec![]],
    );
    scenario.reconnect_delay = delay;
    let mut p = pipeline(scenario);

    let report = p.supervisor.run(&AtomicBool::new(false), Some(3));

    assert_eq!(report.frames, 3);
    assert_eq!(report.read_failures, 1);
    assert_eq!(report.reconnects, 1);
    assert_eq!(report.alerts_sent, 1);

    let log = p.source_log.lock().unwrap();
    assert_eq!(log.opens, 2);
    // One release for the failure, one at shutdown.
    assert_eq!(log.releases, 2);
    assert!(log.open_times[1] - log.open_times[0] >= delay);
}

#[test]
fn stop_flag_ends_session_and_releases_source() {
    let t0 = Instant::now();
    let mut p = pipeline(Scenario::new(vec![frame_at(t0, secs(0))], vec![]));

    let report = p.supervisor.run(&AtomicBool::new(true), None);

    assert_eq!(report.frames, 0);
    let log = p.source_log.lock().unwrap();
    assert_eq!(log.opens, 1);
    assert_eq!(log.releases, 1);
}

// ---- Sampling ----

fn gray_frame_at(base: Instant, offset: Duration, value: u8) -> Result<Frame> {
    let mut frame = Frame::filled(32, 24, value)?;
    frame.captured_at = base + offset;
    Ok(frame)
}

/// Mean red channel of every JPEG in an MJPEG clip.
fn mjpeg_frame_levels(bytes: &[u8]) -> Vec<u8> {
    let starts: Vec<usize> = bytes
        .windows(3)
        .enumerate()
        .filter(|(_, w)| *w == [0xFF, 0xD8, 0xFF])
        .map(|(i, _)| i)
        .collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(bytes.len());
            let image = image::load_from_memory_with_format(
                &bytes[start..end],
                image::ImageFormat::Jpeg,
            )
            .unwrap()
            .to_rgb8();
            let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
            (sum / (image.width() * image.height()) as u64) as u8
        })
        .collect()
}

#[test]
fn only_every_interval_frame_is_inferred_but_ring_keeps_all() {
    let t0 = Instant::now();
    let script = (1..=9u8)
        .map(|i| gray_frame_at(t0, secs(i as u64), i * 20))
        .collect();
    let inferred = Arc::new(Mutex::new(Vec::new()));
    let mut scenario = Scenario::new(script, vec![]);
    scenario.detector = Box::new(InferenceLog {
        inner: StubBackend::scripted(vec![vec![tiger(1)], vec![tiger(2)], vec![tiger(3)]]),
        seen: inferred.clone(),
    });
    scenario.native_fps = 30.0;
    let mut p = pipeline(scenario);

    let report = p.supervisor.run(&AtomicBool::new(false), Some(9));

    assert_eq!(p.supervisor.interval(), 3);
    assert_eq!(report.frames, 9);
    assert_eq!(report.alerts_sent, 3);
    assert_eq!(
        *inferred.lock().unwrap(),
        vec![t0 + secs(3), t0 + secs(6), t0 + secs(9)]
    );

    // Ring of 4: each clip holds every captured frame up to the alert,
    // skipped frames included.
    let uploads = p.uploads.lock().unwrap();
    let expected: [&[u8]; 3] = [&[20, 40, 60], &[60, 80, 100, 120], &[120, 140, 160, 180]];
    assert_eq!(uploads.len(), expected.len());
    for (clip, want) in uploads.iter().zip(expected) {
        let levels = mjpeg_frame_levels(&clip.bytes);
        assert_eq!(levels.len(), want.len());
        for (got, want) in levels.iter().zip(want) {
            assert!(got.abs_diff(*want) <= 4, "clip frame level {} != {}", got, want);
        }
    }
}

// ---- Cleanup invariant ----

fn assert_clips_removed(p: &Pipeline) {
    let uploads = p.uploads.lock().unwrap();
    assert!(!uploads.is_empty(), "a clip should have been extracted");
    for clip in uploads.iter() {
        assert!(clip.existed, "clip must exist while it is uploaded");
        assert!(!clip.path.exists(), "clip {} left behind", clip.path.display());
    }
    assert_eq!(std::fs::read_dir(p.clip_dir.path()).unwrap().count(), 0);
}

#[test]
fn clip_is_removed_after_successful_dispatch() {
    let t0 = Instant::now();
    let mut p = pipeline(Scenario::new(
        vec![frame_at(t0, secs(0)), frame_at(t0, secs(1))],
        vec![vec![], vec![tiger(7)]],
    ));

    let report = p.supervisor.run(&AtomicBool::new(false), Some(2));

    assert_eq!(report.alerts_sent, 1);
    assert_clips_removed(&p);
}

#[test]
fn clip_is_removed_when_upload_and_submit_fail() {
    let t0 = Instant::now();
    let mut scenario = Scenario::new(vec![frame_at(t0, secs(0))], vec![vec![tiger(7)]]);
    scenario.status = 500;
    scenario.upload_url = None;
    let mut p = pipeline(scenario);

    let report = p.supervisor.run(&AtomicBool::new(false), Some(1));

    assert_eq!(report.alerts_sent, 0);
    assert_eq!(report.upload_failures, 1);
    assert_eq!(report.submit_failures, 1);
    let payloads = p.payloads.lock().unwrap();
    assert!(serde_json::to_value(&payloads[0]).unwrap()["videoUrl"].is_null());
    drop(payloads);
    assert_clips_removed(&p);
}

// ---- Filtering and failure handling ----

#[test]
fn non_target_and_low_confidence_detections_never_alert() {
    let t0 = Instant::now();
    let mut p = pipeline(Scenario::new(
        vec![frame_at(t0, secs(0)), frame_at(t0, secs(1))],
        vec![
            vec![RawDetection::new("human", 0.99, [0.0, 0.0, 5.0, 5.0]).with_track(1)],
            vec![
                RawDetection::new("tiger", 0.3, [0.0, 0.0, 5.0, 5.0]).with_track(2),
                RawDetection::new("tiger", f32::NAN, [0.0, 0.0, 5.0, 5.0]).with_track(3),
                RawDetection::new("hyena", 0.8, [0.0, 0.0, f32::INFINITY, 5.0]).with_track(4),
            ],
        ],
    ));

    let report = p.supervisor.run(&AtomicBool::new(false), Some(2));

    assert_eq!(report.qualifying_detections, 0);
    assert!(p.payloads.lock().unwrap().is_empty());
    assert!(p.uploads.lock().unwrap().is_empty());
}

#[test]
fn inference_failures_are_counted_not_fatal() {
    let t0 = Instant::now();
    let mut scenario = Scenario::new(
        vec![frame_at(t0, secs(0)), frame_at(t0, secs(1))],
        vec![],
    );
    scenario.detector = Box::new(FailingDetector);
    let mut p = pipeline(scenario);

    let report = p.supervisor.run(&AtomicBool::new(false), Some(2));

    assert_eq!(report.frames, 2);
    assert_eq!(report.inference_failures, 2);
    assert_eq!(report.alerts_sent, 0);
}

#[test]
fn camera_window_batch_alerts_once_per_window() {
    let t0 = Instant::now();
    let batch = || {
        vec![
            RawDetection::new("tiger", 0.9, [0.0, 0.0, 5.0, 5.0]),
            RawDetection::new("porcupine", 0.7, [6.0, 6.0, 9.0, 9.0]),
        ]
    };
    let mut scenario = Scenario::new(
        vec![
            frame_at(t0, secs(0)),
            frame_at(t0, secs(10)),
            frame_at(t0, secs(30)),
        ],
        vec![batch(), batch(), batch()],
    );
    scenario.novelty = NoveltyStrategy::camera_window(secs(30));
    scenario.form = PayloadForm::Batch;
    let mut p = pipeline(scenario);

    let report = p.supervisor.run(&AtomicBool::new(false), Some(3));

    assert_eq!(report.alerts_sent, 2);
    assert_eq!(report.qualifying_detections, 4);
    assert_eq!(report.class_counts.get("porcupine"), Some(&2));

    let payloads = p.payloads.lock().unwrap();
    let json = serde_json::to_value(&payloads[0]).unwrap();
    assert_eq!(json["total"], 2);
    assert_eq!(json["frame_shape"], serde_json::json!([12, 16]));
    assert_eq!(json["detections"][1]["class_name"], "porcupine");
}
