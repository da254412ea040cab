//! Session controller.
//!
//! [`Session`] owns every piece of mutable client state and the components
//! that act on it. Front ends translate user gestures into calls on it and
//! render [`SessionControls`], the broadcast progress and the log lines.
//! A failed command never leaves partial state behind.

use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use crate::activation::{ActivationClient, ActivationState};
use crate::api::{Backend, ConvertRequest};
use crate::broadcast::{LogBroadcaster, ProgressBroadcaster, ProgressStage};
use crate::config::ClientConfig;
use crate::error::{PollError, Result, ValidationError};
use crate::export::{ExportHandle, ExportKind, Exporter};
use crate::fingerprint::{FingerprintSource, HardwareInfo};
use crate::poller::{JobOutcome, JobPoller, PollHandle, PollerState};
use crate::presenter::{ImageEvent, ImageLoadSummary, ResultPresenter, ResultRecord, ViewControls};
use crate::storage::KeyValueStore;
use crate::upload::{SelectedFile, UploadClient, UploadOptions, UploadOutcome};

const EVENT_CAPACITY: usize = 256;

/// A split upload that still has to be converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingJob {
    pub job_id: String,
    pub total_parts: u32,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub activation: ActivationState,
    pub api_key: Option<SecretString>,
    /// Model reported by the backend when the key was accepted.
    pub model: Option<String>,
    pub file: Option<SelectedFile>,
    pub options: UploadOptions,
    pub pending_job: Option<PendingJob>,
}

impl SessionState {
    pub fn api_key_set(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn file_uploaded(&self) -> bool {
        self.file.is_some()
    }
}

/// Enablement of every user action, recomputed from state on each call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionControls {
    /// Upload and conversion: API key set, activated and a file chosen.
    pub conversion_enabled: bool,
    pub export_enabled: bool,
    pub images_enabled: bool,
}

pub struct Session<B: Backend + 'static, S: KeyValueStore> {
    config: Arc<ClientConfig>,
    backend: Arc<B>,
    state: SessionState,
    activation: ActivationClient<B>,
    uploader: UploadClient<B>,
    poller: JobPoller<B>,
    presenter: ResultPresenter<B, S>,
    exporter: Exporter<B>,
    progress: ProgressBroadcaster,
    logs: LogBroadcaster,
}

impl<B: Backend + 'static, S: KeyValueStore> Session<B, S> {
    pub fn new(config: Arc<ClientConfig>, backend: Arc<B>, store: S) -> Self {
        let progress = ProgressBroadcaster::new(EVENT_CAPACITY);
        let logs = LogBroadcaster::new(EVENT_CAPACITY);

        Self {
            activation: ActivationClient::new(Arc::clone(&backend)),
            uploader: UploadClient::new(Arc::clone(&backend)),
            poller: JobPoller::new(
                Arc::clone(&backend),
                config.poll_interval(),
                progress.clone(),
            ),
            presenter: ResultPresenter::new(Arc::clone(&backend), store, progress.clone()),
            exporter: Exporter::new(
                Arc::clone(&backend),
                config.export_timeout(),
                progress.clone(),
            ),
            state: SessionState::default(),
            config,
            backend,
            progress,
            logs,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    pub fn logs(&self) -> &LogBroadcaster {
        &self.logs
    }

    pub fn result(&self) -> Option<&ResultRecord> {
        self.presenter.current()
    }

    pub fn store(&self) -> &S {
        self.presenter.store()
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller.state()
    }

    pub fn controls(&self) -> SessionControls {
        let ViewControls {
            export_enabled,
            images_enabled,
        } = self.presenter.view_controls();

        SessionControls {
            conversion_enabled: self.state.api_key_set()
                && self.state.activation.activated
                && self.state.file_uploaded(),
            export_enabled,
            images_enabled,
        }
    }

    /// Restores the saved result and API key from the store.
    pub fn restore(&mut self) -> Option<&ResultRecord> {
        if let Some(record) = self.presenter.restore() {
            self.logs.info(&format!(
                "Restored previous result {} ({} images)",
                record.result_id, record.image_count
            ));
        }

        if let Some(api_key) = self.presenter.saved_api_key() {
            self.state.api_key = Some(api_key);
            self.logs.info("Using the saved API key");
        }

        self.presenter.current()
    }

    /// Restores saved data, then activates this machine.
    ///
    /// Restored data stays in place even when activation fails.
    pub async fn initialize(&mut self, source: &dyn FingerprintSource) -> Result<()> {
        self.restore();
        self.activate(source).await
    }

    pub async fn activate(&mut self, source: &dyn FingerprintSource) -> Result<()> {
        let result = self.activation.activate(source).await;
        self.apply_activation(result)
    }

    /// Registers a hardware triple typed in by the user.
    pub async fn activate_manual(&mut self, info: HardwareInfo) -> Result<()> {
        let result = self.activation.activate_manual(info).await;
        self.apply_activation(result)
    }

    fn apply_activation(&mut self, result: Result<ActivationState>) -> Result<()> {
        match result {
            Ok(state) => {
                if state.activated {
                    self.logs.info("Software is activated and ready to use");
                } else {
                    self.logs
                        .warn("Please activate the software before using it");
                }
                self.state.activation = state;
                Ok(())
            }
            Err(e) => {
                self.logs
                    .error(&format!("Failed to get a hardware ID: {}", e));
                Err(e)
            }
        }
    }

    /// Submits `api_key` and, once accepted, keeps it for later sessions.
    pub async fn set_api_key(&mut self, api_key: &str) -> Result<String> {
        let secret = SecretString::from(api_key.trim().to_string());
        let model = match self.activation.set_api_key(&secret).await {
            Ok(model) => model,
            Err(e) => {
                self.logs.error(&format!("API key rejected: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = self.presenter.remember_api_key(secret.expose_secret()) {
            warn!("API key accepted but could not be saved: {}", e);
            self.logs.warn("API key could not be saved for later sessions");
        }

        self.logs
            .info(&format!("API key set, using model {}", model));
        self.state.api_key = Some(secret);
        self.state.model = Some(model.clone());
        Ok(model)
    }

    pub fn clear_api_key(&mut self) -> Result<()> {
        self.state.api_key = None;
        self.state.model = None;
        self.presenter.forget_api_key()?;
        self.logs.info("API key cleared");
        Ok(())
    }

    pub fn set_options(&mut self, options: UploadOptions) {
        self.state.options = options;
    }

    /// Chooses the document to convert. An invalid file leaves the previous
    /// selection in place.
    pub fn select_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&SelectedFile> {
        let file = SelectedFile::from_path(path).inspect_err(|e| {
            self.logs.error(&format!("Cannot use this file: {}", e));
        })?;

        self.logs
            .info(&format!("Selected {}", file.describe(&self.state.options)));
        self.state.pending_job = None;
        Ok(self.state.file.insert(file))
    }

    pub fn clear_file(&mut self) {
        self.state.file = None;
        self.state.pending_job = None;
    }

    /// Uploads the selected file. A single-file result is shown right away;
    /// a split document becomes the pending job for [`Session::convert`].
    pub async fn upload(&mut self) -> Result<UploadOutcome> {
        let file = self
            .state
            .file
            .clone()
            .ok_or(ValidationError::NoFileSelected)?;

        if self.state.options.spelling_correction_without_key() {
            self.logs.warn(
                "Spelling correction is enabled but no Gemini API key was entered",
            );
        }

        self.progress.update(
            ProgressStage::Upload,
            10,
            &format!("Uploading {}...", file.file_name),
        );

        let outcome = self
            .uploader
            .upload(
                &file,
                &self.state.activation,
                self.state.api_key.as_ref(),
                &self.state.options,
            )
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.progress
                    .failed(ProgressStage::Upload, &format!("Upload failed: {}", e));
                self.logs.error(&format!("Upload failed: {}", e));
                return Err(e);
            }
        };

        match &outcome {
            UploadOutcome::Completed(record) => {
                self.state.pending_job = None;
                self.show(record.clone());
                self.progress
                    .update(ProgressStage::Upload, 100, "Conversion completed");
            }
            UploadOutcome::MultiPart {
                job_id,
                total_parts,
            } => {
                self.progress.update(
                    ProgressStage::Upload,
                    20,
                    &format!("File split into {} parts", total_parts),
                );
                self.logs.info(&format!(
                    "{} was split into {} parts",
                    file.file_name, total_parts
                ));
                self.state.pending_job = Some(PendingJob {
                    job_id: job_id.clone(),
                    total_parts: *total_parts,
                });
            }
        }

        Ok(outcome)
    }

    /// Starts server-side conversion of the pending job and begins polling.
    ///
    /// Any job still being polled is stopped first. Feed the handle's outcome
    /// to [`Session::finish_conversion`].
    pub async fn begin_conversion(&mut self) -> Result<PollHandle> {
        let pending = self
            .state
            .pending_job
            .clone()
            .ok_or(ValidationError::NoPendingJob)?;
        let api_key = self
            .state
            .api_key
            .as_ref()
            .ok_or(ValidationError::ApiKeyNotSet)?;
        if !self.state.activation.activated {
            return Err(ValidationError::NotActivated.into());
        }

        self.poller.cancel();

        let request = ConvertRequest {
            conversion_type: self.state.options.conversion_type,
            api_key: Some(api_key.expose_secret().to_string()),
            job_id: Some(pending.job_id.clone()),
        };

        let response = match self.backend.start_conversion(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.progress.failed(
                    ProgressStage::Conversion,
                    &format!("Conversion failed: {}", e),
                );
                self.logs.error(&format!("Could not start conversion: {}", e));
                return Err(e.into());
            }
        };

        let job_id = response
            .job_id
            .filter(|id| !id.is_empty())
            .unwrap_or(pending.job_id);
        let total_parts = response
            .total_parts
            .filter(|n| *n > 0)
            .unwrap_or(pending.total_parts);

        self.logs.info(&format!(
            "Converting {} parts, checking progress every {} seconds",
            total_parts,
            self.poller.interval().as_secs()
        ));
        self.progress
            .update(ProgressStage::Conversion, 0, "Conversion started");

        Ok(self.poller.start(job_id, total_parts))
    }

    /// Applies the outcome of a polling task.
    ///
    /// The pending job is kept on failure so the conversion can be retried.
    pub fn finish_conversion(&mut self, job_id: &str, outcome: JobOutcome) -> Result<ResultRecord> {
        match outcome {
            JobOutcome::Completed(record) => {
                self.state.pending_job = None;
                self.show(record.clone());
                Ok(record)
            }
            JobOutcome::Failed { message } => {
                self.logs
                    .error(&format!("Conversion failed: {}", message));
                Err(PollError::JobFailed {
                    job_id: job_id.to_string(),
                    message,
                }
                .into())
            }
            JobOutcome::Cancelled => {
                self.logs.warn("Conversion cancelled");
                Err(PollError::Cancelled {
                    job_id: job_id.to_string(),
                }
                .into())
            }
        }
    }

    /// Runs the pending multi-part conversion to its end.
    pub async fn convert(&mut self) -> Result<ResultRecord> {
        let handle = self.begin_conversion().await?;
        let job_id = handle.job_id().to_string();
        let outcome = handle.wait().await;
        self.finish_conversion(&job_id, outcome)
    }

    /// Stops polling the current job. Returns whether a job was being polled.
    pub fn cancel_conversion(&mut self) -> bool {
        let cancelled = self.poller.cancel();
        if cancelled {
            self.progress
                .failed(ProgressStage::Conversion, "Conversion cancelled");
        }
        cancelled
    }

    /// Fetches the images of the current result, reporting each as it arrives.
    pub async fn load_images<F>(&self, on_image: F) -> Result<ImageLoadSummary>
    where
        F: FnMut(ImageEvent) + Send,
    {
        let result_id = self
            .presenter
            .current()
            .map(|r| r.result_id.clone())
            .ok_or(ValidationError::NoResult)?;

        self.logs
            .info(&format!("Loading images of {}...", result_id));
        match self.presenter.load_images(&result_id, on_image).await {
            Ok(summary) => {
                self.logs.info(&format!(
                    "Loaded {} of {} images",
                    summary.loaded, summary.attempted
                ));
                Ok(summary)
            }
            Err(e) => {
                self.logs.error(&format!("Error loading images: {}", e));
                Err(e)
            }
        }
    }

    /// Starts downloading the `kind` export of the current result into
    /// `dest_dir` (or the configured download directory). Replaces any
    /// export still running.
    pub fn export(&mut self, kind: ExportKind, dest_dir: Option<&Path>) -> Result<ExportHandle> {
        let result_id = self
            .presenter
            .current()
            .map(|r| r.result_id.clone())
            .ok_or(ValidationError::NoResult)?;
        let dest_dir = dest_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.resolved_download_dir());

        self.logs.info(&format!(
            "Exporting {} as {}...",
            result_id,
            kind.description()
        ));
        Ok(self.exporter.export(&result_id, kind, &dest_dir))
    }

    /// Converts the current result text into a Word document through the
    /// pandoc endpoint.
    pub fn export_text_to_word(&mut self, dest_dir: Option<&Path>) -> Result<ExportHandle> {
        let text = self
            .presenter
            .current()
            .map(|r| r.text.clone())
            .filter(|t| !t.is_empty())
            .ok_or(ValidationError::NoResult)?;
        let dest_dir = dest_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.resolved_download_dir());

        self.logs.info("Converting result text to Word...");
        Ok(self.exporter.convert_to_word(&text, &dest_dir))
    }

    pub fn cancel_export(&mut self) -> bool {
        let cancelled = self.exporter.cancel();
        if cancelled {
            self.logs.warn("Export cancelled");
        }
        cancelled
    }

    pub fn is_exporting(&self) -> bool {
        self.exporter.is_exporting()
    }

    fn show(&mut self, record: ResultRecord) {
        let message = format!(
            "Conversion finished: {} ({} images)",
            record.result_id, record.image_count
        );
        if let Err(e) = self.presenter.present(record) {
            warn!("Result could not be saved: {}", e);
            self.logs
                .warn("Result could not be saved and will not survive a restart");
        }
        info!("{}", message);
        self.logs.info(&message);
    }
}
