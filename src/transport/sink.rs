//! Alert submission collaborator.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use super::payload::AlertPayload;

/// HTTP status the backend answers with when it stored an alert.
pub const CREATED: u16 = 201;

/// Result of one submit attempt. Failures carry the status when one was received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub success: bool,
    pub status: Option<u16>,
}

impl SubmitOutcome {
    pub fn from_status(status: u16) -> Self {
        Self {
            success: status == CREATED,
            status: Some(status),
        }
    }

    pub fn transport_failure() -> Self {
        Self {
            success: false,
            status: None,
        }
    }
}

/// Receives alert payloads. Never retries; one call is one attempt.
pub trait AlertSink: Send {
    fn submit(&mut self, payload: &AlertPayload) -> SubmitOutcome;
}

/// Posts JSON payloads to the backend with a short timeout.
pub struct HttpAlertSink {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpAlertSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).context("parse backend url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "backend url must be http(s), got '{}'",
                parsed.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, payload: &AlertPayload) -> String {
        format!("{}{}", self.base_url, payload.endpoint())
    }
}

impl AlertSink for HttpAlertSink {
    fn submit(&mut self, payload: &AlertPayload) -> SubmitOutcome {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                log::error!("failed to serialize alert payload: {}", e);
                return SubmitOutcome::transport_failure();
            }
        };
        let url = self.url_for(payload);
        let result = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body);

        match result {
            Ok(response) => {
                let status = response.status();
                let outcome = SubmitOutcome::from_status(status);
                if !outcome.success {
                    log::warn!(
                        "backend responded with {}: {}",
                        status,
                        response.into_string().unwrap_or_default()
                    );
                }
                outcome
            }
            Err(ureq::Error::Status(code, response)) => {
                log::warn!(
                    "backend responded with {}: {}",
                    code,
                    response.into_string().unwrap_or_default()
                );
                SubmitOutcome::from_status(code)
            }
            Err(e) => {
                log::error!("failed to send alert to {}: {}", url, e);
                SubmitOutcome::transport_failure()
            }
        }
    }
}

/// Logs payloads instead of sending them. Every submit counts as created.
#[derive(Default)]
pub struct DryRunSink {
    submitted: u64,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl AlertSink for DryRunSink {
    fn submit(&mut self, payload: &AlertPayload) -> SubmitOutcome {
        self.submitted += 1;
        match serde_json::to_string(payload) {
            Ok(json) => log::info!("dry-run POST {} {}", payload.endpoint(), json),
            Err(e) => log::warn!("dry-run payload not serializable: {}", e),
        }
        SubmitOutcome::from_status(CREATED)
    }
}
