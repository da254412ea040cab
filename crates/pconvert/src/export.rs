//! Export downloads (Word with equations, Word with images, ZIP).
//!
//! The export endpoint answers with either a file or a JSON error, both with
//! status 200, so every payload goes through [`classify_payload`] before it
//! is written to disk.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::api::wire::envelope_failure;
use crate::api::{Backend, ExportPayload};
use crate::broadcast::{ProgressBroadcaster, ProgressStage};
use crate::error::{ApiError, ExportError};

const ZIP_CONTENT_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];
const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportKind {
    WordEquation,
    WordImage,
    Zip,
}

impl ExportKind {
    pub const ALL: [ExportKind; 3] = [Self::WordEquation, Self::WordImage, Self::Zip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WordEquation => "word-equation",
            Self::WordImage => "word-image",
            Self::Zip => "zip",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::WordEquation => "Word with equations",
            Self::WordImage => "Word with images",
            Self::Zip => "full ZIP archive",
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown export kind '{}' (expected word-equation, word-image or zip)",
                    s
                )
            })
    }
}

/// Separates real files from JSON error bodies.
///
/// A JSON content type is never a file. Otherwise a body that parses as a
/// failure envelope is an error, and anything else is the file.
pub fn classify_payload(payload: ExportPayload) -> Result<ExportPayload, ApiError> {
    let is_json_type = payload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));

    let looks_like_json = payload
        .bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{');

    if is_json_type || looks_like_json {
        match serde_json::from_slice::<Value>(&payload.bytes) {
            Ok(value) => {
                if let Some(message) = envelope_failure(&value) {
                    return Err(ApiError::Server { message });
                }
                if is_json_type {
                    return Err(ApiError::Decode(
                        "expected a file but received JSON".to_string(),
                    ));
                }
            }
            Err(e) if is_json_type => return Err(ApiError::Decode(e.to_string())),
            Err(_) => {}
        }
    }

    if payload.bytes.is_empty() {
        return Err(ApiError::Decode("empty export body".to_string()));
    }

    Ok(payload)
}

/// File name for a downloaded export. Prefers the server's name, stripped
/// of any directory part.
pub fn export_file_name(payload: &ExportPayload, stem: &str, kind: Option<ExportKind>) -> String {
    if let Some(name) = payload
        .filename
        .as_deref()
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
    {
        return name;
    }

    let content_type = payload
        .content_type
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let extension = if ZIP_CONTENT_TYPES.iter().any(|t| content_type.contains(t)) {
        "zip"
    } else if content_type.contains(DOCX_CONTENT_TYPE) {
        "docx"
    } else {
        match kind {
            Some(ExportKind::Zip) => "zip",
            _ => "docx",
        }
    };

    let stem = Path::new(stem)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "converted_document".to_string());

    match kind {
        Some(kind) => format!("ocr_{}_{}.{}", stem, kind.as_str().replace('-', "_"), extension),
        None => format!("{}.{}", stem, extension),
    }
}

/// Removes a partially written download unless disarmed.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

enum ExportTarget {
    Result { result_id: String, kind: ExportKind },
    Content { content: String },
}

impl ExportTarget {
    fn description(&self) -> &'static str {
        match self {
            ExportTarget::Result { kind, .. } => kind.description(),
            ExportTarget::Content { .. } => "Word document",
        }
    }
}

/// Caller's side of one export.
pub struct ExportHandle {
    id: Uuid,
    task: JoinHandle<Result<PathBuf, ExportError>>,
}

impl ExportHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the download; returns the written file.
    pub async fn wait(self) -> Result<PathBuf, ExportError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ExportError::Cancelled),
            Err(e) => Err(ExportError::Api(ApiError::Transport(format!(
                "export task failed: {}",
                e
            )))),
        }
    }
}

struct ActiveExport {
    id: Uuid,
    abort: AbortHandle,
}

pub struct Exporter<B: Backend + 'static> {
    backend: Arc<B>,
    timeout: Duration,
    progress: ProgressBroadcaster,
    active: Option<ActiveExport>,
}

impl<B: Backend + 'static> Exporter<B> {
    pub fn new(backend: Arc<B>, timeout: Duration, progress: ProgressBroadcaster) -> Self {
        Self {
            backend,
            timeout,
            progress,
            active: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Downloads the `kind` export of `result_id` into `dest_dir`,
    /// tearing down any export still in flight.
    pub fn export(&mut self, result_id: &str, kind: ExportKind, dest_dir: &Path) -> ExportHandle {
        self.spawn(
            ExportTarget::Result {
                result_id: result_id.to_string(),
                kind,
            },
            result_id,
            dest_dir,
        )
    }

    /// Converts raw `content` into a Word document through the pandoc endpoint.
    pub fn convert_to_word(&mut self, content: &str, dest_dir: &Path) -> ExportHandle {
        self.spawn(
            ExportTarget::Content {
                content: content.to_string(),
            },
            "converted_document",
            dest_dir,
        )
    }

    /// Aborts the outstanding export. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(active) if !active.abort.is_finished() => {
                active.abort.abort();
                info!("Cancelled export {}", active.id);
                self.progress
                    .failed(ProgressStage::Export, "Export cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.abort.is_finished())
    }

    fn spawn(&mut self, target: ExportTarget, stem: &str, dest_dir: &Path) -> ExportHandle {
        self.cancel();

        let id = Uuid::new_v4();
        let span = info_span!("export", id = %id);
        let task = tokio::spawn(
            run_export(
                Arc::clone(&self.backend),
                target,
                stem.to_string(),
                dest_dir.to_path_buf(),
                self.timeout,
                self.progress.clone(),
            )
            .instrument(span),
        );

        self.active = Some(ActiveExport {
            id,
            abort: task.abort_handle(),
        });

        ExportHandle { id, task }
    }
}

impl<B: Backend + 'static> Drop for Exporter<B> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.abort.abort();
        }
    }
}

async fn run_export<B: Backend>(
    backend: Arc<B>,
    target: ExportTarget,
    stem: String,
    dest_dir: PathBuf,
    timeout: Duration,
    progress: ProgressBroadcaster,
) -> Result<PathBuf, ExportError> {
    let description = target.description();
    progress.update(
        ProgressStage::Export,
        30,
        &format!("Preparing {}...", description),
    );

    let kind = match &target {
        ExportTarget::Result { kind, .. } => Some(*kind),
        ExportTarget::Content { .. } => None,
    };
    let request = async {
        match &target {
            ExportTarget::Result { result_id, kind } => backend.export(result_id, *kind).await,
            ExportTarget::Content { content } => backend.convert_to_word(content).await,
        }
    };

    progress.update(
        ProgressStage::Export,
        50,
        &format!("Processing {}...", description),
    );

    // Dropping the request future on timeout closes the connection.
    let payload = match tokio::time::timeout(timeout, request).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            warn!("Export of {} failed: {}", description, e);
            progress.failed(ProgressStage::Export, &format!("Export failed: {}", e));
            return Err(e.into());
        }
        Err(_) => {
            warn!(
                "Export of {} timed out after {} seconds",
                description,
                timeout.as_secs()
            );
            progress.failed(ProgressStage::Export, "Export failed: timed out");
            return Err(ExportError::TimedOut { after: timeout });
        }
    };

    let payload = classify_payload(payload).map_err(|e| {
        progress.failed(ProgressStage::Export, &format!("Export failed: {}", e));
        ExportError::Api(e)
    })?;

    let final_path = dest_dir.join(export_file_name(&payload, &stem, kind));
    let part_path = {
        let mut name = final_path.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    };

    let write_err = |path: &Path, source| ExportError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(|e| write_err(&dest_dir, e))?;

    let part = PartFile::new(part_path.clone());
    tokio::fs::write(&part_path, &payload.bytes)
        .await
        .map_err(|e| write_err(&part_path, e))?;
    tokio::fs::rename(&part_path, &final_path)
        .await
        .map_err(|e| write_err(&final_path, e))?;
    part.disarm();

    info!(
        "Exported {} to {} ({} bytes)",
        description,
        final_path.display(),
        payload.bytes.len()
    );
    progress.update(
        ProgressStage::Export,
        100,
        &format!("Exported {} successfully", description),
    );

    Ok(final_path)
}
