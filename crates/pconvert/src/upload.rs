//! File selection and upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

use crate::activation::ActivationState;
use crate::api::{Backend, UploadForm, UploadResponse};
use crate::error::{ApiError, PconvertError, ValidationError};
use crate::presenter::ResultRecord;

const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

/// What the backend should produce from the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionType {
    /// Plain text with LaTeX formulas.
    #[default]
    Text,
    /// Multiple-choice and exercise blocks in LaTeX `ex`/`bt` structure.
    LatexMcq,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::Text => "text",
            ConversionType::LatexMcq => "latex_mcq",
        }
    }
}

impl std::fmt::Display for ConversionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub conversion_type: ConversionType,
    pub spelling_correction: bool,
    pub gemini_api_key: Option<String>,
}

impl UploadOptions {
    /// Page limit the backend applies to a single document.
    pub fn page_limit(&self) -> u32 {
        if self.spelling_correction {
            30
        } else {
            100
        }
    }

    /// Spelling correction needs its own Gemini key to have any effect.
    pub fn spelling_correction_without_key(&self) -> bool {
        self.spelling_correction
            && self
                .gemini_api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
    }
}

/// A document chosen for conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl SelectedFile {
    /// Accepts PDF, JPEG and PNG files that exist on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PconvertError> {
        let path = path.as_ref();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or(ValidationError::NoFileSelected)?;

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ValidationError::UnsupportedFileType(file_name).into());
        }

        let metadata = std::fs::metadata(path).map_err(|e| PconvertError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            mime_type,
            size: metadata.len(),
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }

    /// Human summary, e.g. `scan.pdf (1.25 MB, limit 100 pages)`.
    pub fn describe(&self, options: &UploadOptions) -> String {
        let size_mb = self.size as f64 / 1024.0 / 1024.0;
        if self.is_pdf() {
            format!(
                "{} ({:.2} MB, limit {} pages{})",
                self.file_name,
                size_mb,
                options.page_limit(),
                if options.spelling_correction {
                    " with spelling correction"
                } else {
                    ""
                }
            )
        } else {
            format!("{} ({:.2} MB)", self.file_name, size_mb)
        }
    }
}

/// Which path the client takes after an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The backend converted the document synchronously.
    Completed(ResultRecord),
    /// The document was split; conversion must be started and polled.
    MultiPart { job_id: String, total_parts: u32 },
}

pub struct UploadClient<B: Backend> {
    backend: Arc<B>,
}

impl<B: Backend> UploadClient<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Uploads `file`. Refuses locally unless an API key is set and the
    /// hardware is activated.
    pub async fn upload(
        &self,
        file: &SelectedFile,
        activation: &ActivationState,
        api_key: Option<&SecretString>,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, PconvertError> {
        let api_key = api_key.ok_or(ValidationError::ApiKeyNotSet)?;
        let hardware_id = match activation.hardware_id() {
            Some(id) if activation.activated => id.to_string(),
            _ => return Err(ValidationError::NotActivated.into()),
        };

        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| PconvertError::ReadFile {
                path: file.path.clone(),
                source: e,
            })?;

        let form = UploadForm {
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
            bytes,
            hardware_id,
            api_key: Some(api_key.expose_secret().to_string()),
            options: options.clone(),
        };

        let span = info_span!("upload", file = %file.file_name);
        let response = self.backend.upload(form).instrument(span).await?;
        let outcome = outcome_from_response(response)?;

        match &outcome {
            UploadOutcome::Completed(record) => info!(
                "{} converted in one pass ({} images)",
                file.file_name, record.image_count
            ),
            UploadOutcome::MultiPart {
                job_id,
                total_parts,
            } => info!(
                "{} split into {} parts (job {})",
                file.file_name, total_parts, job_id
            ),
        }

        Ok(outcome)
    }
}

fn outcome_from_response(response: UploadResponse) -> Result<UploadOutcome, ApiError> {
    if response.is_single_file() {
        let result_id = response
            .result_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Decode("single-file response without result_id".into()))?;
        return Ok(UploadOutcome::Completed(ResultRecord {
            result_id,
            text: response.result.unwrap_or_default(),
            image_count: response.image_count.unwrap_or(0),
        }));
    }

    let job_id = response
        .job_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Decode("multi-part response without job_id".into()))?;
    let total_parts = match response.total_parts {
        Some(n) if n >= 1 => n,
        other => {
            return Err(ApiError::Decode(format!(
                "multi-part response with invalid total_parts {:?}",
                other
            )))
        }
    };

    Ok(UploadOutcome::MultiPart {
        job_id,
        total_parts,
    })
}
