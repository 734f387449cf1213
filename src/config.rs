use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::detect::ClassFilter;
use crate::novelty::{NoveltyStrategy, DEFAULT_MAX_TRACKS};
use crate::transport::{CloudinaryCredentials, Location, PayloadForm};

const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CAMERA_URL: &str = "stub://cctv_001";
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_INPUT_WIDTH: u32 = 640;
const DEFAULT_INPUT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: f64 = 2.0;
const DEFAULT_FALLBACK_NATIVE_FPS: f64 = 25.0;
const DEFAULT_CLIP_FPS: u32 = 10;
const DEFAULT_CLIP_DURATION_SECS: u32 = 3;
const DEFAULT_CLIP_ENCODER: &str = "mjpeg";
const DEFAULT_COOLDOWN_SECS: u64 = 20;
const DEFAULT_EXPIRY_SECS: u64 = 30;
const DEFAULT_RECONNECT_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    backend: Option<BackendConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
    detector: Option<DetectorConfigFile>,
    sampling: Option<SamplingConfigFile>,
    clip: Option<ClipConfigFile>,
    novelty: Option<NoveltyConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
    media: Option<MediaConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    url: Option<String>,
    submit_timeout_secs: Option<u64>,
    upload_timeout_secs: Option<u64>,
    form: Option<PayloadForm>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: String,
    url: String,
    #[serde(default)]
    location: Location,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    confidence: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    classes: Option<ClassFilterFile>,
    tracking: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassFilterFile {
    allow: Option<Vec<String>>,
    deny: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingConfigFile {
    target_fps: Option<f64>,
    fallback_native_fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClipConfigFile {
    fps: Option<u32>,
    duration_secs: Option<u32>,
    encoder: Option<String>,
    temp_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct NoveltyConfigFile {
    strategy: Option<String>,
    cooldown_secs: Option<u64>,
    expiry_secs: Option<u64>,
    max_tracks: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MediaConfigFile {
    cloud_name: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub backend: BackendSettings,
    pub cameras: Vec<CameraSettings>,
    pub detector: DetectorSettings,
    pub sampling: SamplingSettings,
    pub clip: ClipSettings,
    pub novelty: NoveltySettings,
    pub reconnect_delay: Duration,
    /// Clip upload is disabled when absent.
    pub media: Option<CloudinaryCredentials>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub submit_timeout: Duration,
    pub upload_timeout: Duration,
    pub form: PayloadForm,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub id: String,
    pub url: String,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub confidence: f32,
    pub input_width: u32,
    pub input_height: u32,
    pub classes: ClassFilter,
    /// Wrap detection-only backends in the IoU tracker.
    pub tracking: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: None,
            labels_path: None,
            confidence: DEFAULT_CONFIDENCE,
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            classes: ClassFilter::default(),
            tracking: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub target_fps: f64,
    /// Used when a source cannot report its own frame rate.
    pub fallback_native_fps: f64,
}

#[derive(Debug, Clone)]
pub struct ClipSettings {
    pub fps: u32,
    pub duration_secs: u32,
    pub encoder: String,
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoveltyMode {
    TrackCooldown,
    CameraWindow,
}

#[derive(Debug, Clone)]
pub struct NoveltySettings {
    pub mode: NoveltyMode,
    pub cooldown: Duration,
    pub expiry: Duration,
    pub max_tracks: usize,
}

impl NoveltySettings {
    pub fn strategy(&self) -> NoveltyStrategy {
        match self.mode {
            NoveltyMode::TrackCooldown => NoveltyStrategy::TrackCooldown {
                cooldown: self.cooldown,
                max_tracks: self.max_tracks,
            },
            NoveltyMode::CameraWindow => NoveltyStrategy::CameraWindow {
                expiry: self.expiry,
            },
        }
    }
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or none), then apply env overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let backend_file = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            url: backend_file
                .url
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            submit_timeout: Duration::from_secs(
                backend_file
                    .submit_timeout_secs
                    .unwrap_or(DEFAULT_SUBMIT_TIMEOUT_SECS),
            ),
            upload_timeout: Duration::from_secs(
                backend_file
                    .upload_timeout_secs
                    .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS),
            ),
            form: backend_file.form.unwrap_or_default(),
        };

        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .map(|camera| CameraSettings {
                    id: camera.id,
                    url: camera.url,
                    location: camera.location,
                })
                .collect(),
            None => cameras_from_urls(&[DEFAULT_CAMERA_URL.to_string()]),
        };

        let detector_file = file.detector.unwrap_or_default();
        let classes = match detector_file.classes {
            None => ClassFilter::default(),
            Some(ClassFilterFile {
                allow: Some(_),
                deny: Some(_),
            }) => {
                return Err(anyhow!(
                    "detector.classes takes either 'allow' or 'deny', not both"
                ))
            }
            Some(ClassFilterFile {
                allow: Some(allow), ..
            }) => ClassFilter::allow(allow),
            Some(ClassFilterFile {
                deny: Some(deny), ..
            }) => ClassFilter::deny(deny),
            Some(_) => ClassFilter::default(),
        };
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.backend),
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            confidence: detector_file.confidence.unwrap_or(defaults.confidence),
            input_width: detector_file.input_width.unwrap_or(defaults.input_width),
            input_height: detector_file.input_height.unwrap_or(defaults.input_height),
            classes,
            tracking: detector_file.tracking.unwrap_or(defaults.tracking),
        };

        let sampling_file = file.sampling.unwrap_or_default();
        let sampling = SamplingSettings {
            target_fps: sampling_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            fallback_native_fps: sampling_file
                .fallback_native_fps
                .unwrap_or(DEFAULT_FALLBACK_NATIVE_FPS),
        };

        let clip_file = file.clip.unwrap_or_default();
        let clip = ClipSettings {
            fps: clip_file.fps.unwrap_or(DEFAULT_CLIP_FPS),
            duration_secs: clip_file
                .duration_secs
                .unwrap_or(DEFAULT_CLIP_DURATION_SECS),
            encoder: clip_file
                .encoder
                .unwrap_or_else(|| DEFAULT_CLIP_ENCODER.to_string()),
            temp_dir: clip_file.temp_dir.unwrap_or_else(std::env::temp_dir),
        };

        let novelty_file = file.novelty.unwrap_or_default();
        let mode = match novelty_file.strategy.as_deref() {
            None | Some("track_cooldown") => NoveltyMode::TrackCooldown,
            Some("camera_window") => NoveltyMode::CameraWindow,
            Some(other) => {
                return Err(anyhow!(
                    "novelty.strategy must be 'track_cooldown' or 'camera_window', got '{}'",
                    other
                ))
            }
        };
        let novelty = NoveltySettings {
            mode,
            cooldown: Duration::from_secs(
                novelty_file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            expiry: Duration::from_secs(novelty_file.expiry_secs.unwrap_or(DEFAULT_EXPIRY_SECS)),
            max_tracks: novelty_file.max_tracks.unwrap_or(DEFAULT_MAX_TRACKS),
        };

        let reconnect_delay = Duration::from_secs(
            file.reconnect
                .and_then(|reconnect| reconnect.delay_secs)
                .unwrap_or(DEFAULT_RECONNECT_SECS),
        );

        let media = file.media.and_then(|media| {
            match (media.cloud_name, media.api_key, media.api_secret) {
                (Some(cloud_name), Some(api_key), Some(api_secret)) => {
                    Some(CloudinaryCredentials {
                        cloud_name,
                        api_key,
                        api_secret,
                    })
                }
                _ => None,
            }
        });

        Ok(Self {
            backend,
            cameras,
            detector,
            sampling,
            clip,
            novelty,
            reconnect_delay,
            media,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SENTINEL_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.url = url.trim().to_string();
            }
        }
        if let Ok(urls) = std::env::var("SENTINEL_STREAM_URLS") {
            let parsed = split_csv(&urls);
            if !parsed.is_empty() {
                self.cameras = cameras_from_urls(&parsed);
            }
        }
        if let Ok(path) = std::env::var("SENTINEL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(confidence) = std::env::var("SENTINEL_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTINEL_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(cooldown) = std::env::var("SENTINEL_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.novelty.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(delay) = std::env::var("SENTINEL_RECONNECT_SECS") {
            let seconds: u64 = delay.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_RECONNECT_SECS must be an integer number of seconds")
            })?;
            self.reconnect_delay = Duration::from_secs(seconds);
        }

        let cloud_name = non_empty_env("CLOUDINARY_CLOUD_NAME");
        let api_key = non_empty_env("CLOUDINARY_API_KEY");
        let api_secret = non_empty_env("CLOUDINARY_API_SECRET");
        if cloud_name.is_some() || api_key.is_some() || api_secret.is_some() {
            let current = self.media.take();
            let merged = (
                cloud_name.or_else(|| current.as_ref().map(|m| m.cloud_name.clone())),
                api_key.or_else(|| current.as_ref().map(|m| m.api_key.clone())),
                api_secret.or_else(|| current.as_ref().map(|m| m.api_secret.clone())),
            );
            self.media = match merged {
                (Some(cloud_name), Some(api_key), Some(api_secret)) => {
                    Some(CloudinaryCredentials {
                        cloud_name,
                        api_key,
                        api_secret,
                    })
                }
                _ => {
                    log::warn!("incomplete Cloudinary credentials; clip upload disabled");
                    None
                }
            };
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let backend = Url::parse(&self.backend.url)
            .map_err(|e| anyhow!("invalid backend url '{}': {}", self.backend.url, e))?;
        if !matches!(backend.scheme(), "http" | "https") {
            return Err(anyhow!("backend url must use http or https"));
        }
        if self.backend.submit_timeout.is_zero() || self.backend.upload_timeout.is_zero() {
            return Err(anyhow!("backend timeouts must be greater than zero"));
        }

        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for camera in &self.cameras {
            crate::validate_camera_id(&camera.id)?;
            if !seen.insert(camera.id.as_str()) {
                return Err(anyhow!("duplicate camera id '{}'", camera.id));
            }
            if camera.url.trim().is_empty() {
                return Err(anyhow!("camera '{}' has an empty url", camera.id));
            }
        }

        let confidence = self.detector.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "detector confidence must be within [0, 1], got {}",
                confidence
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input resolution must be non-zero"));
        }

        for (name, value) in [
            ("sampling.target_fps", self.sampling.target_fps),
            ("sampling.fallback_native_fps", self.sampling.fallback_native_fps),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if self.clip.fps == 0 || self.clip.duration_secs == 0 {
            return Err(anyhow!("clip fps and duration must be greater than zero"));
        }
        if self.novelty.cooldown.is_zero() || self.novelty.expiry.is_zero() {
            return Err(anyhow!("novelty windows must be greater than zero"));
        }
        if self.novelty.max_tracks == 0 {
            return Err(anyhow!("novelty.max_tracks must be greater than zero"));
        }
        if self.reconnect_delay.is_zero() {
            return Err(anyhow!("reconnect delay must be greater than zero"));
        }
        Ok(())
    }

    /// Frame ring capacity for one session.
    pub fn ring_capacity(&self) -> usize {
        (self.clip.fps as usize).saturating_mul(self.clip.duration_secs as usize)
    }
}

/// Camera entries for bare stream URLs: `cctv_001`, `cctv_002`, ...
fn cameras_from_urls(urls: &[String]) -> Vec<CameraSettings> {
    urls.iter()
        .enumerate()
        .map(|(idx, url)| CameraSettings {
            id: format!("cctv_{:03}", idx + 1),
            url: url.clone(),
            location: Location::default(),
        })
        .collect()
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
