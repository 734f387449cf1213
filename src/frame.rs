//! Raw frame container and the rolling pre-alert buffer.
//!
//! - `Frame`: RGB24 pixels plus dimensions and capture instant.
//! - `FrameRing`: bounded ring buffer holding the most recent frames so a clip
//!   can be cut around the moment a detection qualifies.
//!
//! The ring is fed on every captured frame, independent of the detection
//! sampling cadence. It is the only owner of the frame copies used for clips.

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use std::collections::VecDeque;
use std::time::Instant;

/// Bytes per pixel for the only layout the pipeline carries (RGB24).
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap decoded pixels. Fails if the buffer length does not match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Solid-colour frame, used by synthetic sources and tests.
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self> {
        let len = expected_len(width, height)?;
        Self::new(vec![value; len], width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `[height, width]`, the order the backend expects for `frame_shape`.
    pub fn shape(&self) -> [u32; 2] {
        [self.height, self.width]
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Resize to `width`x`height`. A frame already at that size is copied as is.
    pub fn resized(&self, width: u32, height: u32) -> Result<Frame> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize frame to {}x{}", width, height));
        }
        let image = RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .context("frame buffer does not match its dimensions")?;
        let scaled = imageops::resize(&image, width, height, FilterType::Triangle);
        Ok(Frame {
            pixels: scaled.into_raw(),
            width,
            height,
            captured_at: self.captured_at,
        })
    }

    /// Copy the frame, reporting allocation failure instead of aborting.
    fn try_copy(&self) -> Option<Frame> {
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(self.pixels.len()).ok()?;
        pixels.extend_from_slice(&self.pixels);
        Some(Frame {
            pixels,
            width: self.width,
            height: self.height,
            captured_at: self.captured_at,
        })
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero"));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// FrameRing: bounded rolling window
// ----------------------------------------------------------------------------

/// Fixed-capacity FIFO of the most recent frames.
///
/// - Capacity is set once (`clip_fps * clip_duration_secs`) and never changes.
/// - `push` copies the frame and evicts the oldest entry once full.
/// - `push` never fails: if the copy cannot be allocated the frame is dropped
///   and the buffer is left untouched.
pub struct FrameRing {
    buffer: VecDeque<Frame>,
    capacity: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Ring sized for a clip of `duration_secs` at `fps`.
    pub fn for_clip(fps: u32, duration_secs: u32) -> Self {
        Self::new((fps as usize).saturating_mul(duration_secs as usize))
    }

    /// Append a copy of `frame`, evicting the oldest frame when at capacity.
    pub fn push(&mut self, frame: &Frame) {
        let Some(copy) = frame.try_copy() else {
            log::debug!(
                "frame ring: dropped {}x{} frame (copy allocation failed)",
                frame.width,
                frame.height
            );
            return;
        };

        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(copy);
    }

    /// Buffered frames, oldest first. Nothing is removed.
    pub fn snapshot(&self) -> Vec<&Frame> {
        self.buffer.iter().collect()
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.buffer.back()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Memory usage estimate.
    pub fn memory_bytes(&self) -> usize {
        self.buffer.iter().map(Frame::byte_len).sum()
    }
}
