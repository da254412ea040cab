//! Scripted in-memory backend.
//!
//! Every endpoint answers from a queue or a fixed response configured by the
//! test, and every call is counted so tests can assert what went over the
//! wire.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use pconvert::api::wire::parse_envelope;
use pconvert::api::{
    ApiKeyResponse, Backend, ConvertRequest, ConvertResponse, ExportPayload, HardwareIdResponse,
    ManifestResponse, StatusResponse, UploadForm, UploadResponse,
};
use pconvert::{ApiError, ExportKind, HardwareInfo, JobStatus};

/// How the export endpoint behaves for one call.
pub enum ExportScript {
    Respond(Result<ExportPayload, ApiError>),
    /// Never answers; the request future is only ever dropped.
    Hang,
}

#[derive(Default)]
pub struct CallCounts {
    pub register_hardware: AtomicUsize,
    pub set_api_key: AtomicUsize,
    pub upload: AtomicUsize,
    pub start_conversion: AtomicUsize,
    pub conversion_status: AtomicUsize,
    pub result_manifest: AtomicUsize,
    pub fetch_image: AtomicUsize,
    pub export: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct Script {
    hardware: Result<HardwareIdResponse, ApiError>,
    api_key: Result<ApiKeyResponse, ApiError>,
    uploads: VecDeque<Result<UploadResponse, ApiError>>,
    convert: Result<ConvertResponse, ApiError>,
    statuses: VecDeque<Result<StatusResponse, ApiError>>,
    status_delay: Option<Duration>,
    manifest: Result<ManifestResponse, ApiError>,
    images: HashMap<String, Vec<u8>>,
    exports: VecDeque<ExportScript>,
    status_job_ids: Vec<String>,
    registered: Vec<HardwareInfo>,
}

pub struct MockBackend {
    script: Mutex<Script>,
    pub calls: CallCounts,
    /// Set when a hanging export request is dropped.
    pub export_dropped: Arc<AtomicBool>,
    /// Set when a delayed status request is dropped before it answers.
    pub status_dropped: Arc<AtomicBool>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Activated hardware, accepted API key, nothing else scripted.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                hardware: Ok(hardware_response("HW-TEST-Premium", true)),
                api_key: Ok(parse_envelope(json!({"success": true, "model": "gemini-test"}))
                    .expect("api key response")),
                uploads: VecDeque::new(),
                convert: Ok(parse_envelope(json!({"success": true})).expect("convert response")),
                statuses: VecDeque::new(),
                status_delay: None,
                manifest: Ok(parse_envelope(json!({"success": true, "image_count": 0}))
                    .expect("manifest response")),
                images: HashMap::new(),
                exports: VecDeque::new(),
                status_job_ids: Vec::new(),
                registered: Vec::new(),
            }),
            calls: CallCounts::default(),
            export_dropped: Arc::new(AtomicBool::new(false)),
            status_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("mock script lock")
    }

    pub fn set_hardware(&self, response: Result<HardwareIdResponse, ApiError>) {
        self.script().hardware = response;
    }

    pub fn set_api_key_response(&self, response: Result<ApiKeyResponse, ApiError>) {
        self.script().api_key = response;
    }

    pub fn push_upload(&self, response: Result<UploadResponse, ApiError>) {
        self.script().uploads.push_back(response);
    }

    pub fn set_convert(&self, response: Result<ConvertResponse, ApiError>) {
        self.script().convert = response;
    }

    pub fn push_status(&self, response: Result<StatusResponse, ApiError>) {
        self.script().statuses.push_back(response);
    }

    /// Every status request answers only after `delay`.
    pub fn set_status_delay(&self, delay: Duration) {
        self.script().status_delay = Some(delay);
    }

    pub fn set_manifest(&self, response: Result<ManifestResponse, ApiError>) {
        self.script().manifest = response;
    }

    pub fn add_image(&self, image_id: &str, bytes: &[u8]) {
        self.script()
            .images
            .insert(image_id.to_string(), bytes.to_vec());
    }

    pub fn push_export(&self, script: ExportScript) {
        self.script().exports.push_back(script);
    }

    /// Job ids of every status request, in order.
    pub fn status_job_ids(&self) -> Vec<String> {
        self.script().status_job_ids.clone()
    }

    pub fn registered(&self) -> Vec<HardwareInfo> {
        self.script().registered.clone()
    }
}

/// Raises its flag when dropped while still armed.
struct DropFlag {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl DropFlag {
    fn new(flag: &Arc<AtomicBool>) -> Self {
        Self {
            flag: Arc::clone(flag),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DropFlag {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn register_hardware(
        &self,
        info: &HardwareInfo,
    ) -> Result<HardwareIdResponse, ApiError> {
        self.calls.register_hardware.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        script.registered.push(info.clone());
        script.hardware.clone()
    }

    async fn set_api_key(&self, _api_key: &str) -> Result<ApiKeyResponse, ApiError> {
        self.calls.set_api_key.fetch_add(1, Ordering::SeqCst);
        self.script().api_key.clone()
    }

    async fn upload(&self, _form: UploadForm) -> Result<UploadResponse, ApiError> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        self.script()
            .uploads
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Transport("no upload scripted".to_string())))
    }

    async fn start_conversion(
        &self,
        _request: &ConvertRequest,
    ) -> Result<ConvertResponse, ApiError> {
        self.calls.start_conversion.fetch_add(1, Ordering::SeqCst);
        self.script().convert.clone()
    }

    async fn conversion_status(&self, job_id: &str) -> Result<StatusResponse, ApiError> {
        self.calls.conversion_status.fetch_add(1, Ordering::SeqCst);
        let (response, delay) = {
            let mut script = self.script();
            script.status_job_ids.push(job_id.to_string());
            let response = script
                .statuses
                .pop_front()
                .unwrap_or_else(|| Ok(status(JobStatus::InProgress, 0, 0)));
            (response, script.status_delay)
        };

        if let Some(delay) = delay {
            let flag = DropFlag::new(&self.status_dropped);
            tokio::time::sleep(delay).await;
            flag.disarm();
        }
        response
    }

    async fn result_manifest(&self, _result_id: &str) -> Result<ManifestResponse, ApiError> {
        self.calls.result_manifest.fetch_add(1, Ordering::SeqCst);
        self.script().manifest.clone()
    }

    async fn fetch_image(&self, _result_id: &str, image_id: &str) -> Result<Vec<u8>, ApiError> {
        self.calls.fetch_image.fetch_add(1, Ordering::SeqCst);
        self.script()
            .images
            .get(image_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                body: "Not Found".to_string(),
            })
    }

    async fn export(&self, _result_id: &str, _kind: ExportKind) -> Result<ExportPayload, ApiError> {
        self.calls.export.fetch_add(1, Ordering::SeqCst);
        let next = self.script().exports.pop_front();
        match next {
            Some(ExportScript::Respond(response)) => response,
            Some(ExportScript::Hang) => {
                let _flag = DropFlag::new(&self.export_dropped);
                std::future::pending::<Result<ExportPayload, ApiError>>().await
            }
            None => Err(ApiError::Transport("no export scripted".to_string())),
        }
    }

    async fn convert_to_word(&self, content: &str) -> Result<ExportPayload, ApiError> {
        self.calls.export.fetch_add(1, Ordering::SeqCst);
        Ok(ExportPayload {
            content_type: Some(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                    .to_string(),
            ),
            filename: None,
            bytes: content.as_bytes().to_vec(),
        })
    }
}

pub fn hardware_response(hardware_id: &str, activated: bool) -> HardwareIdResponse {
    HardwareIdResponse {
        hardware_id: hardware_id.to_string(),
        activated,
    }
}

pub fn status(status: JobStatus, completed: u32, total: u32) -> StatusResponse {
    StatusResponse {
        status,
        completed,
        total,
        result: None,
        result_id: None,
        image_count: None,
        message: None,
    }
}

pub fn completed_status(total: u32, text: &str, result_id: &str, images: u32) -> StatusResponse {
    StatusResponse {
        result: Some(text.to_string()),
        result_id: Some(result_id.to_string()),
        image_count: Some(images),
        ..status(JobStatus::Completed, total, total)
    }
}

pub fn single_file_upload(result_id: &str, text: &str, images: u32) -> UploadResponse {
    parse_envelope(json!({
        "success": true,
        "single_file": true,
        "result": text,
        "result_id": result_id,
        "image_count": images,
    }))
    .expect("single-file upload response")
}

pub fn multi_part_upload(job_id: &str, total_parts: u32) -> UploadResponse {
    parse_envelope(json!({
        "success": true,
        "single_file": false,
        "job_id": job_id,
        "total_parts": total_parts,
    }))
    .expect("multi-part upload response")
}

pub fn file_payload(content_type: &str, bytes: &[u8]) -> ExportPayload {
    ExportPayload {
        content_type: Some(content_type.to_string()),
        filename: None,
        bytes: bytes.to_vec(),
    }
}
