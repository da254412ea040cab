//! reqwest implementation of [`Backend`].
//!
//! Logs through the `log` facade: these are single request/response calls
//! that open no spans, and `tracing-log` forwards the records to the
//! subscriber.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::backend::Backend;
use super::wire::{
    disposition_filename, parse_envelope, truncate_body, ApiKeyResponse, ConvertRequest,
    ConvertResponse, ExportPayload, HardwareIdResponse, ManifestResponse, StatusRequest,
    StatusResponse, UploadForm, UploadResponse,
};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::export::ExportKind;
use crate::fingerprint::HardwareInfo;

/// Slack added to client-side deadlines so that the caller's own timeout
/// fires first and is reported as such.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Creates an HTTP client with the configured timeouts.
fn create_http_client(config: &ClientConfig) -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .user_agent(concat!("pconvert/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))
}

pub struct HttpBackend {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpBackend {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, ApiError> {
        Ok(Self {
            client: create_http_client(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Deadline for requests during which the backend does real work
    /// (synchronous OCR on upload, document generation on export).
    fn long_request_timeout(&self) -> Duration {
        self.config.export_timeout() + DEADLINE_SLACK
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.config.url(path);
        debug!("POST {}", url);
        let response = self.client.post(&url).json(body).send().await?;
        read_envelope(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.config.url(path);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        read_envelope(response).await
    }
}

/// Reads a JSON envelope. Error statuses still carry an envelope on this
/// backend, so the body is inspected before the status code.
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    match serde_json::from_str::<Value>(&body) {
        Ok(value) => {
            let parsed = parse_envelope(value);
            if parsed.is_err() || status.is_success() {
                return parsed;
            }
            Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            })
        }
        Err(e) if status.is_success() => Err(ApiError::Decode(e.to_string())),
        Err(_) => Err(ApiError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        }),
    }
}

/// Collects a download body, keeping the headers needed to classify it.
async fn read_payload(response: Response) -> Result<ExportPayload, ApiError> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let filename = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename);
    let bytes = response.bytes().await?.to_vec();

    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes);
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            if let Some(message) = super::wire::envelope_failure(&value) {
                return Err(ApiError::Server { message });
            }
        }
        return Err(ApiError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    Ok(ExportPayload {
        content_type,
        filename,
        bytes,
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register_hardware(
        &self,
        info: &HardwareInfo,
    ) -> Result<HardwareIdResponse, ApiError> {
        let response: HardwareIdResponse = self
            .post_json(&self.config.endpoints.hardware_id, info)
            .await?;
        info!(
            "Hardware ID {} (activated: {})",
            response.hardware_id, response.activated
        );
        Ok(response)
    }

    async fn set_api_key(&self, api_key: &str) -> Result<ApiKeyResponse, ApiError> {
        self.post_json(
            &self.config.endpoints.set_api_key,
            &json!({ "api_key": api_key }),
        )
        .await
    }

    async fn upload(&self, form: UploadForm) -> Result<UploadResponse, ApiError> {
        let url = self.config.url(&self.config.endpoints.upload);
        info!(
            "Uploading {} ({} bytes) to {}",
            form.file_name,
            form.bytes.len(),
            url
        );

        let part = Part::bytes(form.bytes)
            .file_name(form.file_name)
            .mime_str(&form.mime_type)?;
        let mut multipart = Form::new()
            .part("file", part)
            .text("hardware_id", form.hardware_id)
            .text("type", form.options.conversion_type.as_str())
            .text(
                "spelling_correction",
                form.options.spelling_correction.to_string(),
            );
        if let Some(api_key) = form.api_key {
            multipart = multipart.text("api_key", api_key);
        }
        if let Some(gemini_key) = form.options.gemini_api_key {
            multipart = multipart.text("gemini_api_key", gemini_key);
        }

        let response = self
            .client
            .post(&url)
            .timeout(self.long_request_timeout())
            .multipart(multipart)
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn start_conversion(
        &self,
        request: &ConvertRequest,
    ) -> Result<ConvertResponse, ApiError> {
        self.post_json(&self.config.endpoints.convert, request)
            .await
    }

    async fn conversion_status(&self, job_id: &str) -> Result<StatusResponse, ApiError> {
        self.post_json(
            &self.config.endpoints.conversion_status,
            &StatusRequest { job_id },
        )
        .await
    }

    async fn result_manifest(&self, result_id: &str) -> Result<ManifestResponse, ApiError> {
        self.get_json(&format!("{}/{}", self.config.endpoints.results, result_id))
            .await
    }

    async fn fetch_image(&self, result_id: &str, image_id: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.config.url(&format!(
            "{}/{}/{}",
            self.config.endpoints.images, result_id, image_id
        ));
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Image {} unavailable ({})", image_id, status);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn export(&self, result_id: &str, kind: ExportKind) -> Result<ExportPayload, ApiError> {
        let url = self.config.url(&format!(
            "{}/{}",
            self.config.endpoints.export, result_id
        ));
        info!("Requesting {} export of {}", kind, result_id);
        let response = self
            .client
            .get(&url)
            .query(&[("type", kind.as_str())])
            .timeout(self.long_request_timeout())
            .send()
            .await?;
        read_payload(response).await
    }

    async fn convert_to_word(&self, content: &str) -> Result<ExportPayload, ApiError> {
        let url = self.config.url(&self.config.endpoints.convert_to_word);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "content": content }))
            .timeout(self.long_request_timeout())
            .send()
            .await?;
        read_payload(response).await
    }
}
