//! Clip extraction.
//!
//! Cuts a short clip from the frame ring when a detection qualifies. Every
//! buffered frame is resized to the resolution of the oldest one and handed to
//! a `ClipEncoder`. The result lives in a temporary file that is removed when
//! the `TempClip` is closed or dropped, whichever comes first.
//!
//! Extraction never fails the caller: an empty ring or an encoder error yields
//! `None` and the alert goes out without media.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempPath;

use crate::frame::Frame;

const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Clip encoder collaborator.
pub trait ClipEncoder: Send {
    fn name(&self) -> &'static str;

    /// File extension of the produced clip, without the dot.
    fn extension(&self) -> &'static str;

    /// Encode `frames` (all the same size) at `fps` into `path`.
    fn encode(&mut self, frames: &[Frame], fps: u32, path: &Path) -> Result<()>;
}

/// Build the encoder named in the configuration.
pub fn encoder_by_name(name: &str) -> Result<Box<dyn ClipEncoder>> {
    match name {
        "mjpeg" => Ok(Box::new(MjpegEncoder::default())),
        "ffmpeg" => Ok(Box::new(FfmpegCliEncoder::default())),
        other => Err(anyhow!("unknown clip encoder '{}'", other)),
    }
}

// ----------------------------------------------------------------------------
// Encoders
// ----------------------------------------------------------------------------

/// Motion-JPEG elementary stream: concatenated baseline JPEGs.
///
/// Pure Rust and always available. The stream carries no timing, so `fps` is
/// only logged; players fall back to their default rate.
pub struct MjpegEncoder {
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for MjpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ClipEncoder for MjpegEncoder {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn encode(&mut self, frames: &[Frame], fps: u32, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create clip file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for frame in frames {
            JpegEncoder::new_with_quality(&mut writer, self.quality)
                .encode(
                    frame.pixels(),
                    frame.width,
                    frame.height,
                    ExtendedColorType::Rgb8,
                )
                .context("encode clip frame as jpeg")?;
        }
        writer.flush().context("flush clip file")?;
        log::debug!(
            "mjpeg clip: {} frames (nominal {} fps) -> {}",
            frames.len(),
            fps,
            path.display()
        );
        Ok(())
    }
}

/// H.264 MP4 through the `ffmpeg` executable, fed raw RGB24 on stdin.
pub struct FfmpegCliEncoder {
    program: PathBuf,
}

impl FfmpegCliEncoder {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegCliEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl ClipEncoder for FfmpegCliEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn encode(&mut self, frames: &[Frame], fps: u32, path: &Path) -> Result<()> {
        let first = frames
            .first()
            .ok_or_else(|| anyhow!("no frames to encode"))?;
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", first.width, first.height)])
            .args(["-r", &fps.max(1).to_string()])
            .args(["-i", "-", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
            for frame in frames {
                stdin
                    .write_all(frame.pixels())
                    .context("write frame to ffmpeg")?;
            }
        }

        let output = child.wait_with_output().context("wait for ffmpeg")?;
        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Extractor
// ----------------------------------------------------------------------------

/// A clip on disk. The file is removed on `close` or drop.
#[derive(Debug)]
pub struct TempClip {
    path: TempPath,
    frames: usize,
}

impl TempClip {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Remove the file now, reporting failure.
    pub fn close(self) -> Result<()> {
        let display = self.path.display().to_string();
        self.path
            .close()
            .with_context(|| format!("failed to remove clip {}", display))
    }
}

pub struct ClipExtractor {
    encoder: Box<dyn ClipEncoder>,
    fps: u32,
    temp_dir: PathBuf,
}

impl ClipExtractor {
    pub fn new(encoder: Box<dyn ClipEncoder>, fps: u32, temp_dir: PathBuf) -> Self {
        Self {
            encoder,
            fps: fps.max(1),
            temp_dir,
        }
    }

    pub fn encoder_name(&self) -> &'static str {
        self.encoder.name()
    }

    /// Materialize `frames` (oldest first) as a clip.
    ///
    /// Returns `None` if there is nothing to encode or encoding fails.
    pub fn extract(&mut self, frames: &[&Frame], camera_id: &str) -> Option<TempClip> {
        match self.try_extract(frames, camera_id) {
            Ok(clip) => clip,
            Err(e) => {
                log::error!("error creating clip for {}: {:#}", camera_id, e);
                None
            }
        }
    }

    fn try_extract(&mut self, frames: &[&Frame], camera_id: &str) -> Result<Option<TempClip>> {
        let Some(first) = frames.first() else {
            return Ok(None);
        };
        let (width, height) = (first.width, first.height);

        let mut resized = Vec::with_capacity(frames.len());
        for frame in frames {
            match frame.resized(width, height) {
                Ok(f) => resized.push(f),
                Err(e) => log::debug!("skipping clip frame: {:#}", e),
            }
        }
        if resized.is_empty() {
            return Ok(None);
        }

        let path = tempfile::Builder::new()
            .prefix(&format!("detection_{}_", camera_id))
            .suffix(&format!(".{}", self.encoder.extension()))
            .tempfile_in(&self.temp_dir)
            .with_context(|| format!("create temp clip in {}", self.temp_dir.display()))?
            .into_temp_path();

        // On error `path` is dropped here, which removes the partial file.
        self.encoder.encode(&resized, self.fps, &path)?;

        log::info!(
            "clip saved locally: {} ({} frames, {})",
            path.display(),
            resized.len(),
            self.encoder.name()
        );
        Ok(Some(TempClip {
            path,
            frames: resized.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEncoder;

    impl ClipEncoder for FailingEncoder {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extension(&self) -> &'static str {
            "bin"
        }

        fn encode(&mut self, _frames: &[Frame], _fps: u32, path: &Path) -> Result<()> {
            std::fs::write(path, b"partial")?;
            Err(anyhow!("encoder exploded"))
        }
    }

    fn frames() -> Vec<Frame> {
        vec![
            Frame::filled(8, 6, 10).unwrap(),
            Frame::filled(16, 12, 20).unwrap(),
            Frame::filled(8, 6, 30).unwrap(),
        ]
    }

    #[test]
    fn empty_ring_yields_no_clip() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor =
            ClipExtractor::new(Box::new(MjpegEncoder::default()), 10, dir.path().into());
        assert!(extractor.extract(&[], "cam").is_none());
    }

    #[test]
    fn mjpeg_clip_contains_every_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut extractor =
            ClipExtractor::new(Box::new(MjpegEncoder::default()), 10, dir.path().into());
        let frames = frames();
        let refs: Vec<&Frame> = frames.iter().collect();

        let clip = extractor
            .extract(&refs, "cctv_001")
            .ok_or_else(|| anyhow!("expected clip"))?;
        assert_eq!(clip.frame_count(), 3);
        let name = clip.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("detection_cctv_001_"));
        assert!(name.ends_with(".mjpeg"));

        let bytes = std::fs::read(clip.path())?;
        let soi = bytes.windows(2).filter(|w| w[0] == 0xFF && w[1] == 0xD8).count();
        assert!(soi >= 3);

        let path = clip.path().to_path_buf();
        clip.close()?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn dropping_clip_removes_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut extractor =
            ClipExtractor::new(Box::new(MjpegEncoder::default()), 10, dir.path().into());
        let frames = frames();
        let refs: Vec<&Frame> = frames.iter().collect();
        let clip = extractor.extract(&refs, "cam").unwrap();
        let path = clip.path().to_path_buf();
        assert!(path.exists());
        drop(clip);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn encoder_failure_yields_none_and_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = ClipExtractor::new(
            Box::new(FailingEncoder),
            10,
            dir.path().into(),
        );
        let frames = frames();
        let refs: Vec<&Frame> = frames.iter().collect();

        assert!(extractor.extract(&refs, "cam").is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn encoders_resolve_by_name() {
        assert_eq!(encoder_by_name("mjpeg").unwrap().extension(), "mjpeg");
        assert_eq!(encoder_by_name("ffmpeg").unwrap().extension(), "mp4");
        assert!(encoder_by_name("gif").is_err());
    }
}
