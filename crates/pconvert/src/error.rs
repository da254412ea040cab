use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PconvertError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("Conversion error: {0}")]
    Poll(#[from] PollError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors detected locally, before anything is sent to the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing hardware fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("No file selected")]
    NoFileSelected,

    #[error("File type not supported: {0}")]
    UnsupportedFileType(String),

    #[error("The software is not activated for this hardware ID")]
    NotActivated,

    #[error("API key has not been set")]
    ApiKeyNotSet,

    #[error("API key is required")]
    EmptyApiKey,

    #[error("No conversion result is available")]
    NoResult,

    #[error("No multi-part job is waiting for conversion")]
    NoPendingJob,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// `success: false` reported by the backend; the message is shown verbatim.
    #[error("{message}")]
    Server { message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn server(message: impl Into<String>) -> Self {
        ApiError::Server {
            message: message.into(),
        }
    }

    /// True for failures of the transport itself rather than the backend's answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Conversion job '{job_id}' failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Polling for job '{job_id}' was cancelled")]
    Cancelled { job_id: String },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export timed out after {} seconds", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("Export was cancelled")]
    Cancelled,

    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("Failed to write export file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Could not load any of the {attempted} images")]
    NoneLoaded { attempted: usize },

    #[error("Image id '{image_id}' has no usable file name")]
    InvalidName { image_id: String },

    #[error("Failed to write image '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read storage file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write storage file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage file '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for environment variable '{name}'")]
    InvalidEnv { name: String, value: String },
}

pub type Result<T> = std::result::Result<T, PconvertError>;
