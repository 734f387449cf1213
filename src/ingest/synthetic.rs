//! Synthetic `stub://` source for local runs without camera hardware.
//!
//! URL form: `stub://<name>?width=640&height=480&fps=10&realtime=true`.
//! Every query parameter is optional. With `realtime` the source sleeps so
//! frames arrive at the declared rate.

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use url::Url;

use crate::frame::{Frame, RGB_CHANNELS};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 10.0;

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub realtime: bool,
}

impl SyntheticConfig {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse stub url '{}'", url))?;
        if parsed.scheme() != "stub" {
            return Err(anyhow!("not a stub:// url: {}", url));
        }
        let mut config = Self {
            url: url.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            realtime: true,
        };
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "width" => config.width = value.parse().context("stub width")?,
                "height" => config.height = value.parse().context("stub height")?,
                "fps" => config.fps = value.parse().context("stub fps")?,
                "realtime" => config.realtime = value.parse().context("stub realtime")?,
                other => log::debug!("ignoring stub url parameter '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        if !(config.fps.is_finite() && config.fps > 0.0) {
            return Err(anyhow!("stub fps must be positive"));
        }
        Ok(config)
    }
}

pub(crate) struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
    opened: bool,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub(crate) fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            opened: false,
            next_due: None,
        }
    }

    pub(crate) fn open(&mut self, label: &str) -> Result<()> {
        self.opened = true;
        self.next_due = None;
        log::info!("{}: connected to {} (synthetic)", label, self.config.url);
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("synthetic source {} is not open", self.config.url));
        }
        if self.config.realtime {
            self.pace();
        }
        self.frame_count += 1;
        // Shift the scene now and then so consecutive clips differ.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = self.config.width as usize * self.config.height as usize * RGB_CHANNELS;
        let offset = self.frame_count + self.scene_state as u64;
        let pixels = (0..len)
            .map(|i| ((i as u64 + offset) % 256) as u8)
            .collect();
        Frame::new(pixels, self.config.width, self.config.height)
    }

    pub(crate) fn release(&mut self) {
        self.opened = false;
    }

    pub(crate) fn native_fps(&self) -> Option<f64> {
        Some(self.config.fps)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.opened
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn url(&self) -> &str {
        &self.config.url
    }

    fn pace(&mut self) {
        let period = Duration::from_secs_f64(1.0 / self.config.fps);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() -> Result<()> {
        let config = SyntheticConfig::parse("stub://gate?width=32&height=24&fps=25&realtime=false")?;
        assert_eq!(config.width, 32);
        assert_eq!(config.height, 24);
        assert_eq!(config.fps, 25.0);
        assert!(!config.realtime);
        Ok(())
    }

    #[test]
    fn defaults_apply_without_query() -> Result<()> {
        let config = SyntheticConfig::parse("stub://gate")?;
        assert_eq!((config.width, config.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert!(config.realtime);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::parse("stub://gate?width=0").is_err());
        assert!(SyntheticConfig::parse("stub://gate?fps=-1").is_err());
        assert!(SyntheticConfig::parse("rtsp://gate").is_err());
    }

    #[test]
    fn read_requires_open() -> Result<()> {
        let mut source =
            SyntheticSource::new(SyntheticConfig::parse("stub://gate?width=4&height=4&realtime=false")?);
        assert!(source.read().is_err());
        source.open("test")?;
        let frame = source.read()?;
        assert_eq!(frame.byte_len(), 4 * 4 * 3);
        source.release();
        assert!(source.read().is_err());
        assert_eq!(source.frames_captured(), 1);
        Ok(())
    }
}
