pub mod activation;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod poller;
pub mod presenter;
pub mod session;
pub mod storage;
pub mod upload;

pub use activation::{ActivationClient, ActivationState};
pub use api::{Backend, HttpBackend};
pub use broadcast::{LogBroadcaster, LogEvent, ProgressBroadcaster, ProgressEvent, ProgressStage};
pub use config::{load_config, ClientConfig};
pub use error::{
    ApiError, ConfigError, ExportError, ImageError, PconvertError, PollError, Result,
    StorageError, ValidationError,
};
pub use export::{ExportHandle, ExportKind, Exporter};
pub use fingerprint::{Fingerprint, FingerprintSource, HardwareInfo, HostFingerprint};
pub use poller::{ConversionJob, JobOutcome, JobPoller, JobStatus, PollHandle, PollerState};
pub use presenter::{ImageEvent, ImageLoadSummary, ResultPresenter, ResultRecord, ViewControls};
pub use session::{PendingJob, Session, SessionControls, SessionState};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use upload::{ConversionType, SelectedFile, UploadClient, UploadOptions, UploadOutcome};
