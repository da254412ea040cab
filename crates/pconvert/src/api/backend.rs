use async_trait::async_trait;

use super::wire::{
    ApiKeyResponse, ConvertRequest, ConvertResponse, ExportPayload, HardwareIdResponse,
    ManifestResponse, StatusResponse, UploadForm, UploadResponse,
};
use crate::error::ApiError;
use crate::export::ExportKind;
use crate::fingerprint::HardwareInfo;

/// One method per backend endpoint.
///
/// Implementations return [`ApiError::Server`] for `success: false`
/// envelopes and [`ApiError::Transport`] when the request itself failed.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn register_hardware(&self, info: &HardwareInfo)
        -> Result<HardwareIdResponse, ApiError>;

    async fn set_api_key(&self, api_key: &str) -> Result<ApiKeyResponse, ApiError>;

    async fn upload(&self, form: UploadForm) -> Result<UploadResponse, ApiError>;

    async fn start_conversion(&self, request: &ConvertRequest)
        -> Result<ConvertResponse, ApiError>;

    async fn conversion_status(&self, job_id: &str) -> Result<StatusResponse, ApiError>;

    async fn result_manifest(&self, result_id: &str) -> Result<ManifestResponse, ApiError>;

    async fn fetch_image(&self, result_id: &str, image_id: &str) -> Result<Vec<u8>, ApiError>;

    /// Raw export download; may be a file or a JSON error with a 200 status.
    async fn export(&self, result_id: &str, kind: ExportKind) -> Result<ExportPayload, ApiError>;

    /// Pandoc conversion of plain content into a Word document.
    async fn convert_to_word(&self, content: &str) -> Result<ExportPayload, ApiError>;
}
