//! Frame ingestion sources.
//!
//! This module provides different sources for raw frames:
//! - Network streams (RTSP IP cameras, HTTP/HLS; feature: rtsp-gstreamer)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` sources (always available)
//!
//! All sources implement `FrameSource` and produce RGB24 `Frame`s that flow into
//! the session's frame ring.
//!
//! The ingestion layer MUST NOT:
//! - Retry or reconnect on its own
//! - Store raw frames to disk
//! - Transmit raw frames over the network

use anyhow::Result;

use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod rtsp;
mod synthetic;

pub use file::{FileConfig, FileSource};
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::SyntheticConfig;

/// Capture collaborator.
///
/// `open` connects (or reconnects after `release`), `read` blocks for the next
/// frame and fails on a stalled or broken stream. Sources are created and used
/// on the session's own thread, so they need not be `Send`.
pub trait FrameSource {
    fn open(&mut self) -> Result<()>;

    fn read(&mut self) -> Result<Frame>;

    fn release(&mut self);

    /// Native frame rate, when the source knows it.
    fn native_fps(&self) -> Option<f64>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read(&mut self) -> Result<Frame> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn native_fps(&self) -> Option<f64> {
        (**self).native_fps()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Pick a source implementation for `url`.
///
/// `stub://` and URL schemes go to the stream source; anything without a
/// scheme is treated as a local file path.
pub fn source_for_url(url: &str) -> Result<Box<dyn FrameSource>> {
    if url.contains("://") {
        Ok(Box::new(RtspSource::new(RtspConfig {
            url: url.to_string(),
            ..RtspConfig::default()
        })?))
    } else {
        Ok(Box::new(FileSource::new(FileConfig {
            path: url.to_string(),
        })?))
    }
}
