//! Network stream frame source.
//!
//! This module provides `RtspSource` for ingesting frames from IP cameras via
//! RTSP, or any other URI GStreamer can decode (HTTP MJPEG, HLS).
//!
//! The stream source is responsible for:
//! - Connecting to camera streams
//! - Decoding video frames to RGB24
//! - Reporting the stream's native frame rate once known
//! - Tearing the pipeline down on `release` so `open` can reconnect
//!
//! The stream source MUST NOT:
//! - Store decoded frames to disk
//! - Retry on its own; reconnect policy belongs to the supervisor

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::{Duration, Instant};

use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a network stream source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Stream URL (e.g., "rtsp://192.168.1.100:554/stream") or `stub://name`.
    pub url: String,
    /// Expected frame rate, used for stall detection until the stream reports its own.
    pub expected_fps: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            expected_fps: 25,
        }
    }
}

/// Network stream frame source.
///
/// Uses GStreamer for real decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticSource::new(SyntheticConfig::parse(
                    &config.url,
                )?)),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!(
                    "stream {} requires the rtsp-gstreamer feature",
                    config.url
                )
            }
        }
    }
}

impl FrameSource for RtspSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.open("RtspSource"),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.open(),
        }
    }

    fn read(&mut self) -> Result<Frame> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.read(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.release(),
        }
    }

    fn native_fps(&self) -> Option<f64> {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.native_fps(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.native_fps,
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => SourceStats {
                frames_captured: source.frames_captured(),
                url: source.url().to_string(),
            },
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => SourceStats {
                frames_captured: source.frame_count,
                url: source.config.url.clone(),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Production stream source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    native_fps: Option<f64>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build the pipeline: `<source> ! decodebin ! videoconvert ! appsink` with RGB caps.
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let source = if config.url.starts_with("rtsp://") || config.url.starts_with("rtsps://") {
            format!("rtspsrc location={} latency=0 ! decodebin", config.url)
        } else {
            format!("uridecodebin uri={}", config.url)
        };
        let pipeline_description = format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            source
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            native_fps: None,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn open(&mut self) -> Result<()> {
        self.last_error = None;
        self.last_frame_at = None;
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", self.config.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            anyhow::bail!("{}", err);
        }

        let timeout = self.frame_timeout();
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow::anyhow!("stream stalled"))?;

        let (pixels, width, height, fps) = sample_to_pixels(&sample)?;
        if fps.is_some() {
            self.native_fps = fps;
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height)
    }

    fn release(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop {}: {}", self.config.url, e);
        }
        self.connected_at = None;
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn frame_period_ms(&self) -> u64 {
        match self.native_fps {
            Some(fps) if fps > 0.0 => (1000.0 / fps) as u64,
            _ => 1000 / u64::from(self.config.expected_fps.max(1)),
        }
    }

    fn frame_timeout(&self) -> gstreamer::ClockTime {
        let ms = self.frame_period_ms().saturating_mul(4).max(500);
        gstreamer::ClockTime::from_mseconds(ms)
    }

    fn health_grace(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms().saturating_mul(6).max(2_000))
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32, Option<f64>)> {
    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let width = info.width();
    let height = info.height();
    let fps = info.fps();
    let fps = (fps.numer() > 0 && fps.denom() > 0)
        .then(|| fps.numer() as f64 / fps.denom() as f64);
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map stream buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height, fps));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("stream buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height, fps))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
