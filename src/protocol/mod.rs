//! Wire Protocol
//!
//! One self-delimited text message per frame in each direction. The request
//! carries an optional correlation timestamp and a base64-encoded image; the
//! response echoes the timestamp and carries the ordered detection records.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope failures that end the session.
///
/// The envelope is the minimal unit of synchronization on the stream, so a
/// request that cannot be parsed closes the connection rather than being
/// recovered from partially.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Request body is not a valid frame request
    #[error("malformed request envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Image field is present but not valid base64
    #[error("image payload is not valid base64: {0}")]
    ImagePayload(#[from] base64::DecodeError),
}

/// One client-submitted frame: an optional correlation timestamp plus the
/// base64-encoded bytes of a compressed raster image.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameRequest {
    /// Opaque client value, echoed verbatim in the response
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    /// Base64-encoded image bytes
    pub image: String,
}

impl FrameRequest {
    /// Parse one request envelope from a text message.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the base64 image payload into raw bytes.
    pub fn image_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(BASE64.decode(&self.image)?)
    }
}

/// One detected region with its recognized text.
///
/// `x`/`y` are the top-left corner in image pixel coordinates, `w`/`h` the
/// box measurements; `text` may be empty when the region carried no
/// recognizable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
    pub text: String,
}

/// Per-frame result sent back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResponse {
    /// Timestamp echoed from the request; absent when the request had none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
    /// Detection records in the detection capability's output order
    pub detections: Vec<Detection>,
}

impl FrameResponse {
    /// Assemble the response envelope from the per-region records.
    ///
    /// Pure aggregation: record order is preserved and the timestamp is
    /// echoed verbatim.
    pub fn assemble(timestamp: Option<serde_json::Value>, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections,
        }
    }
}
