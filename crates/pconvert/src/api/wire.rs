//! Request and response bodies exchanged with the conversion backend.
//!
//! Every JSON response is wrapped in the same loose envelope:
//! `{"success": true, ...}` or `{"success": false, "error"|"message": "..."}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::poller::JobStatus;
use crate::upload::{ConversionType, UploadOptions};

/// Maximum length for error bodies echoed into error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

/// Unwraps the `success` envelope into either the payload or the server's message.
pub fn parse_envelope<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    if let Some(message) = envelope_failure(&value) {
        return Err(ApiError::Server { message });
    }

    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Returns the failure message when `value` is a `success: false` envelope.
pub fn envelope_failure(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    match object.get("success").and_then(Value::as_bool) {
        Some(false) => {}
        Some(true) => return None,
        // No flag at all: only a bare `error` field counts as a failure.
        None if object.contains_key("error") => {}
        None => return None,
    }

    let message = ["error", "message"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|m| !m.is_empty())
        .unwrap_or("Unknown error");
    Some(message.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareIdResponse {
    pub hardware_id: String,
    #[serde(default)]
    pub activated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// Absent on older backends; a response carrying a result is single-file.
    #[serde(default)]
    pub single_file: Option<bool>,
    #[serde(default, alias = "text")]
    pub result: Option<String>,
    #[serde(default)]
    pub result_id: Option<String>,
    #[serde(default)]
    pub image_count: Option<u32>,
    #[serde(default, alias = "conversion_id")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub total_parts: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl UploadResponse {
    pub fn is_single_file(&self) -> bool {
        self.single_file
            .unwrap_or(self.result.is_some() || self.job_id.is_none())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertRequest {
    #[serde(rename = "type")]
    pub conversion_type: ConversionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertResponse {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default, alias = "conversion_id")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub total_parts: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRequest<'a> {
    pub job_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub result_id: Option<String>,
    #[serde(default)]
    pub image_count: Option<u32>,
    /// Present on `status: error` responses that still claim success.
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestResponse {
    #[serde(default)]
    pub image_count: u32,
    #[serde(default)]
    pub image_ids: Vec<String>,
}

/// Multipart upload body.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub hardware_id: String,
    pub api_key: Option<String>,
    pub options: UploadOptions,
}

/// Raw body of an export download. Whether it is a file or an error is
/// decided by [`crate::export::classify_payload`].
#[derive(Debug, Clone)]
pub struct ExportPayload {
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Extracts `filename` from a `Content-Disposition` header value.
pub fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let value = value.trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
