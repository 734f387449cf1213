use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use wildlife_sentinel::config::{NoveltyMode, SentinelConfig};
use wildlife_sentinel::{ClassFilter, NoveltyStrategy, PayloadForm};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_BACKEND_URL",
        "SENTINEL_STREAM_URLS",
        "SENTINEL_MODEL_PATH",
        "SENTINEL_CONFIDENCE",
        "SENTINEL_COOLDOWN_SECS",
        "SENTINEL_RECONNECT_SECS",
        "CLOUDINARY_CLOUD_NAME",
        "CLOUDINARY_API_KEY",
        "CLOUDINARY_API_SECRET",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.backend.url, "http://localhost:3000");
    assert_eq!(cfg.backend.submit_timeout, Duration::from_secs(5));
    assert_eq!(cfg.backend.upload_timeout, Duration::from_secs(120));
    assert_eq!(cfg.backend.form, PayloadForm::Record);
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].id, "cctv_001");
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.confidence, 0.5);
    assert_eq!(cfg.detector.classes, ClassFilter::animals());
    assert_eq!(cfg.ring_capacity(), 30);
    assert_eq!(
        cfg.novelty.strategy(),
        NoveltyStrategy::track_cooldown(Duration::from_secs(20))
    );
    assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
    assert!(cfg.media.is_none());

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "backend": {
                "url": "http://backend.local:3000",
                "submit_timeout_secs": 3,
                "form": "batch"
            },
            "cameras": [
                {
                    "id": "aniresq_cam_1",
                    "url": "rtsp://10.0.0.5/stream",
                    "location": {
                        "locationName": "Forest Zone 1",
                        "latitude": 12.9716,
                        "longitude": 77.5946
                    }
                }
            ],
            "detector": {
                "confidence": 0.65,
                "input_width": 320,
                "input_height": 240,
                "classes": { "deny": ["human", "humans"] }
            },
            "clip": { "fps": 5, "duration_secs": 4, "encoder": "ffmpeg" },
            "novelty": { "strategy": "camera_window", "expiry_secs": 45 },
            "media": { "cloud_name": "demo", "api_key": "k", "api_secret": "s" }
        }"#,
    );

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_BACKEND_URL", "https://alerts.example.org");
    std::env::set_var("SENTINEL_CONFIDENCE", "0.7");
    std::env::set_var("SENTINEL_RECONNECT_SECS", "9");
    std::env::set_var("CLOUDINARY_API_SECRET", "rotated");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.backend.url, "https://alerts.example.org");
    assert_eq!(cfg.backend.submit_timeout, Duration::from_secs(3));
    assert_eq!(cfg.backend.form, PayloadForm::Batch);
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].id, "aniresq_cam_1");
    assert_eq!(cfg.cameras[0].location.name.as_deref(), Some("Forest Zone 1"));
    assert_eq!(cfg.cameras[0].location.latitude, Some(12.9716));
    assert_eq!(cfg.detector.confidence, 0.7);
    assert_eq!(cfg.detector.input_width, 320);
    assert_eq!(cfg.detector.classes, ClassFilter::non_human());
    assert_eq!(cfg.clip.encoder, "ffmpeg");
    assert_eq!(cfg.ring_capacity(), 20);
    assert_eq!(cfg.novelty.mode, NoveltyMode::CameraWindow);
    assert_eq!(
        cfg.novelty.strategy(),
        NoveltyStrategy::camera_window(Duration::from_secs(45))
    );
    assert_eq!(cfg.reconnect_delay, Duration::from_secs(9));
    let media = cfg.media.expect("media credentials");
    assert_eq!(media.cloud_name, "demo");
    assert_eq!(media.api_secret, "rotated");

    clear_env();
}

#[test]
fn stream_urls_env_generates_camera_ids() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var(
        "SENTINEL_STREAM_URLS",
        "rtsp://cam-a/stream, ,rtsp://cam-b/stream,stub://cam-c",
    );
    std::env::set_var("SENTINEL_COOLDOWN_SECS", "60");

    let cfg = SentinelConfig::load().expect("load config");
    let ids: Vec<&str> = cfg.cameras.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["cctv_001", "cctv_002", "cctv_003"]);
    assert_eq!(cfg.cameras[1].url, "rtsp://cam-b/stream");
    assert_eq!(cfg.novelty.cooldown, Duration::from_secs(60));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_CONFIDENCE", "1.5");
    assert!(SentinelConfig::load().is_err());
    std::env::set_var("SENTINEL_CONFIDENCE", "abc");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_BACKEND_URL", "ftp://backend");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    let bad_id = write_config(r#"{ "cameras": [ { "id": "../../etc", "url": "stub://x" } ] }"#);
    assert!(SentinelConfig::load_from(Some(bad_id.path())).is_err());

    let no_cameras = write_config(r#"{ "cameras": [] }"#);
    assert!(SentinelConfig::load_from(Some(no_cameras.path())).is_err());

    let duplicate = write_config(
        r#"{ "cameras": [ { "id": "a", "url": "stub://a" }, { "id": "a", "url": "stub://b" } ] }"#,
    );
    assert!(SentinelConfig::load_from(Some(duplicate.path())).is_err());

    let both_filters =
        write_config(r#"{ "detector": { "classes": { "allow": ["tiger"], "deny": ["human"] } } }"#);
    assert!(SentinelConfig::load_from(Some(both_filters.path())).is_err());

    let zero_clip = write_config(r#"{ "clip": { "fps": 0 } }"#);
    assert!(SentinelConfig::load_from(Some(zero_clip.path())).is_err());

    let bad_strategy = write_config(r#"{ "novelty": { "strategy": "sometimes" } }"#);
    assert!(SentinelConfig::load_from(Some(bad_strategy.path())).is_err());

    let malformed = write_config("{ not json");
    assert!(SentinelConfig::load_from(Some(malformed.path())).is_err());

    clear_env();
}

#[test]
fn partial_cloudinary_credentials_disable_upload() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CLOUDINARY_CLOUD_NAME", "demo");
    std::env::set_var("CLOUDINARY_API_KEY", "key");
    let cfg = SentinelConfig::load().expect("load config");
    assert!(cfg.media.is_none());

    std::env::set_var("CLOUDINARY_API_SECRET", "secret");
    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.media.expect("credentials").api_key, "key");

    clear_env();
}
