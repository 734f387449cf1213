//! Stream supervisor.
//!
//! One session per camera. A `SessionContext` owns every collaborator and every
//! piece of temporal state the session needs (frame ring, novelty tables,
//! statistics), so sessions share nothing and can run side by side on their
//! own threads.
//!
//! Per captured frame:
//! 1. Push a copy into the frame ring
//! 2. Count the frame
//! 3. On every `sampling_interval`-th frame: resize to the inference
//!    resolution, infer, normalize, run the novelty tracker, and dispatch
//!
//! A failed read releases the source, waits `reconnect_delay`, reopens, and
//! carries on. There is no retry limit; only the stop flag ends the loop.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::clip::{encoder_by_name, ClipExtractor};
use crate::config::{CameraSettings, SentinelConfig};
use crate::detect::{build_backend, normalize, ClassFilter, DetectorBackend};
use crate::dispatch::AlertDispatcher;
use crate::frame::{Frame, FrameRing};
use crate::ingest::{source_for_url, FrameSource};
use crate::novelty::{NoveltyStrategy, NoveltyTracker};
use crate::stats::{SessionReport, SessionStats};
use crate::transport::{AlertSink, CloudinaryUploader, DryRunSink, HttpAlertSink, MediaUploader};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Frames between inference runs: `max(1, floor(native / target))`.
pub fn sampling_interval(native_fps: f64, target_fps: f64) -> u64 {
    if !(native_fps.is_finite() && target_fps.is_finite()) || native_fps <= 0.0 || target_fps <= 0.0
    {
        return 1;
    }
    ((native_fps / target_fps).floor() as u64).max(1)
}

/// Tunables for one session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub confidence: f32,
    pub classes: ClassFilter,
    pub inference_width: u32,
    pub inference_height: u32,
    pub novelty: NoveltyStrategy,
    pub ring_capacity: usize,
    pub target_fps: f64,
    pub fallback_native_fps: f64,
    pub reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            confidence: config.detector.confidence,
            classes: config.detector.classes.clone(),
            inference_width: config.detector.input_width,
            inference_height: config.detector.input_height,
            novelty: config.novelty.strategy(),
            ring_capacity: config.ring_capacity(),
            target_fps: config.sampling.target_fps,
            fallback_native_fps: config.sampling.fallback_native_fps,
            reconnect_delay: config.reconnect_delay,
        }
    }
}

/// Everything one camera session owns.
pub struct SessionContext {
    pub camera_id: String,
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn DetectorBackend>,
    pub dispatcher: AlertDispatcher,
    pub settings: SessionSettings,
}

/// Options that come from the command line rather than the config file.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Log payloads instead of posting them.
    pub dry_run: bool,
}

impl SessionContext {
    /// Build a session for `camera` from the loaded configuration.
    ///
    /// Fails on anything that makes the session unusable: unknown source
    /// scheme, unknown encoder, unloadable model, bad backend URL.
    pub fn from_config(
        config: &SentinelConfig,
        camera: &CameraSettings,
        options: SessionOptions,
    ) -> Result<Self> {
        let source = source_for_url(&camera.url)
            .with_context(|| format!("camera {}: open source {}", camera.id, camera.url))?;
        let detector = build_backend(&config.detector)
            .with_context(|| format!("camera {}: load detector", camera.id))?;

        let encoder = encoder_by_name(&config.clip.encoder)?;
        let extractor = ClipExtractor::new(encoder, config.clip.fps, config.clip.temp_dir.clone());

        let sink: Box<dyn AlertSink> = if options.dry_run {
            Box::new(DryRunSink::new())
        } else {
            Box::new(HttpAlertSink::new(
                &config.backend.url,
                config.backend.submit_timeout,
            )?)
        };
        let uploader: Option<Box<dyn MediaUploader>> = match &config.media {
            Some(credentials) if !options.dry_run => Some(Box::new(CloudinaryUploader::new(
                credentials.clone(),
                config.backend.upload_timeout,
            )?)),
            _ => None,
        };

        let dispatcher = AlertDispatcher::new(
            &camera.id,
            camera.location.clone(),
            config.backend.form,
            extractor,
            uploader,
            sink,
        );

        Ok(Self {
            camera_id: camera.id.clone(),
            source,
            detector,
            dispatcher,
            settings: SessionSettings::from_config(config),
        })
    }
}

/// Drives one session until stopped.
pub struct StreamSupervisor {
    camera_id: String,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    dispatcher: AlertDispatcher,
    settings: SessionSettings,
    ring: FrameRing,
    novelty: NoveltyTracker,
    stats: SessionStats,
    interval: u64,
}

impl StreamSupervisor {
    pub fn new(context: SessionContext) -> Self {
        let SessionContext {
            camera_id,
            source,
            detector,
            dispatcher,
            settings,
        } = context;
        Self {
            camera_id,
            source,
            detector,
            dispatcher,
            ring: FrameRing::new(settings.ring_capacity),
            novelty: NoveltyTracker::new(settings.novelty),
            stats: SessionStats::new(),
            interval: 1,
            settings,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Current sampling interval in frames.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Run until `stop` is set or `max_frames` frames have been captured.
    ///
    /// Read failures never end the loop. The source is released before the
    /// final report is returned.
    pub fn run(&mut self, stop: &AtomicBool, max_frames: Option<u64>) -> SessionReport {
        log::info!(
            "{}: session starting (detector={}, ring={} frames)",
            self.camera_id,
            self.detector.name(),
            self.ring.capacity()
        );

        let mut connected = self.connect();
        let mut last_health_log = Instant::now();

        while !stop.load(Ordering::SeqCst) {
            if max_frames.is_some_and(|limit| self.stats.frames() >= limit) {
                break;
            }

            if !connected {
                self.backoff(stop);
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                connected = self.connect();
                if connected {
                    self.stats.record_reconnect();
                }
                continue;
            }

            match self.source.read() {
                Ok(frame) => self.process_frame(frame),
                Err(e) => {
                    self.stats.record_read_failure();
                    log::warn!(
                        "{}: frame read failed: {:#}; reconnecting in {:?}",
                        self.camera_id,
                        e,
                        self.settings.reconnect_delay
                    );
                    self.source.release();
                    connected = false;
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = self.source.stats();
                log::info!(
                    "{}: source health={} frames={} url={}",
                    self.camera_id,
                    self.source.is_healthy(),
                    source_stats.frames_captured,
                    source_stats.url
                );
                log::debug!(
                    "{}: frame ring {}/{} frames, ~{} KB",
                    self.camera_id,
                    self.ring.len(),
                    self.ring.capacity(),
                    self.ring.memory_bytes() / 1024
                );
                last_health_log = Instant::now();
            }
        }

        self.source.release();
        let report = self.stats.snapshot(&self.camera_id);
        log::info!(
            "{}: session stopped after {} frames, {} alerts",
            self.camera_id,
            report.frames,
            report.alerts_sent
        );
        report
    }

    /// Open the source and derive the sampling interval from its frame rate.
    fn connect(&mut self) -> bool {
        match self.source.open() {
            Ok(()) => {
                let native = self
                    .source
                    .native_fps()
                    .unwrap_or(self.settings.fallback_native_fps);
                self.interval = sampling_interval(native, self.settings.target_fps);
                log::info!(
                    "{}: processing every {} frame(s) (native {:.1} fps, target {:.1} fps)",
                    self.camera_id,
                    self.interval,
                    native,
                    self.settings.target_fps
                );
                true
            }
            Err(e) => {
                self.stats.record_read_failure();
                log::warn!("{}: failed to open source: {:#}", self.camera_id, e);
                false
            }
        }
    }

    /// Sleep for the reconnect delay, waking early on stop.
    fn backoff(&self, stop: &AtomicBool) {
        let deadline = Instant::now() + self.settings.reconnect_delay;
        loop {
            let now = Instant::now();
            if now >= deadline || stop.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
        }
    }

    fn process_frame(&mut self, frame: Frame) {
        self.ring.push(&frame);
        let count = self.stats.record_frame();
        if count % self.interval != 0 {
            return;
        }

        let inference_frame =
            match frame.resized(self.settings.inference_width, self.settings.inference_height) {
                Ok(resized) => resized,
                Err(e) => {
                    log::debug!("{}: dropping frame {}: {:#}", self.camera_id, count, e);
                    return;
                }
            };

        let raw = match self
            .detector
            .infer(&inference_frame, self.settings.confidence)
        {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.record_inference_failure();
                log::warn!("{}: inference failed: {:#}", self.camera_id, e);
                return;
            }
        };

        let detections = normalize(&raw, self.settings.confidence, &self.settings.classes);
        if detections.is_empty() {
            return;
        }

        let qualifying = self
            .novelty
            .evaluate(&self.camera_id, &detections, frame.captured_at);
        if qualifying.is_empty() {
            log::debug!(
                "{}: {} detection(s) suppressed by novelty tracker",
                self.camera_id,
                detections.len()
            );
            return;
        }

        self.stats.record_qualifying(qualifying.len());
        for detection in &qualifying {
            log::warn!(
                "ALERT: {} {} conf={:.2} track={}",
                self.camera_id,
                detection.class_name,
                detection.confidence,
                detection
                    .track_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string())
            );
        }

        let snapshot = self.ring.snapshot();
        self.dispatcher.dispatch(
            &qualifying,
            &snapshot,
            Some(inference_frame.shape()),
            &mut self.stats,
        );
    }
}
