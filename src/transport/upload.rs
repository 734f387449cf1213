//! Media upload collaborator.
//!
//! `CloudinaryUploader` posts a clip as `multipart/form-data` to the Cloudinary
//! video upload API using a SHA-256 signed request and returns `secure_url`.
//! Every failure maps to `None`; the caller submits the alert without media.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CLOUDINARY_API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Uploads a local file and returns a URL for it.
pub trait MediaUploader: Send {
    fn upload(&mut self, path: &Path) -> Option<String>;
}

/// Cloudinary account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

pub struct CloudinaryUploader {
    client: reqwest::blocking::Client,
    credentials: CloudinaryCredentials,
    api_base: String,
}

impl CloudinaryUploader {
    pub fn new(credentials: CloudinaryCredentials, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build upload client")?;
        Ok(Self {
            client,
            credentials,
            api_base: CLOUDINARY_API_BASE.to_string(),
        })
    }

    /// Point the uploader at a different API root (tests, proxies).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/{}/video/upload",
            self.api_base, self.credentials.cloud_name
        )
    }

    /// Signed upload form: credentials, timestamp, signature and the clip.
    fn build_form(&self, path: &Path, timestamp: &str) -> Result<Form> {
        let file_bytes =
            std::fs::read(path).with_context(|| format!("read clip {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        let signature = sign_params(&[("timestamp", timestamp)], &self.credentials.api_secret);

        let clip = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .context("clip part mime type")?;
        Ok(Form::new()
            .text("api_key", self.credentials.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
            .part("file", clip))
    }

    fn try_upload(&self, path: &Path) -> Result<String> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_secs()
            .to_string();
        let form = self.build_form(path, &timestamp)?;

        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .context("upload transport error")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "upload rejected with {}: {}",
                status.as_u16(),
                response.text().unwrap_or_default()
            ));
        }

        let parsed: UploadResponse = response.json().context("parse upload response")?;
        parsed
            .secure_url
            .ok_or_else(|| anyhow!("upload response carried no secure_url"))
    }
}

impl MediaUploader for CloudinaryUploader {
    fn upload(&mut self, path: &Path) -> Option<String> {
        match self.try_upload(path) {
            Ok(url) => {
                log::info!("uploaded clip to {}", url);
                Some(url)
            }
            Err(e) => {
                log::error!("upload of {} failed: {:#}", path.display(), e);
                None
            }
        }
    }
}

/// Cloudinary request signature: hex SHA-256 over the parameters sorted by
/// name and joined as `k=v&k=v`, followed by the API secret.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}
