//! Outbound transport: alert wire formats, the alert sink, and media upload.
//!
//! The transport layer is responsible for:
//! - Building alert payloads in the record or batch wire shape
//! - Posting payloads to the backend with a short timeout
//! - Uploading clips with a long timeout
//!
//! The transport layer MUST NOT:
//! - Retry a failed submit or upload
//! - Hold on to clip files after an upload attempt

pub mod payload;
pub mod sink;
pub mod upload;

pub use payload::{
    confidence_percent, timestamp_now, AlertPayload, BatchDetection, DetectionBatch,
    DetectionRecord, Location, PayloadForm, BATCH_ENDPOINT, RECORD_ENDPOINT,
};
pub use sink::{AlertSink, DryRunSink, HttpAlertSink, SubmitOutcome, CREATED};
pub use upload::{CloudinaryCredentials, CloudinaryUploader, MediaUploader};
