use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Seconds between two conversion status requests.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for a single export download.
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Location of the durable session store. Falls back to the platform data directory.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_poll_interval() -> u64 {
    3
}

fn default_export_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoints: EndpointsConfig::default(),
            poll_interval_secs: default_poll_interval(),
            export_timeout_secs: default_export_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            storage_path: None,
            download_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolves the session store path, preferring the configured one.
    pub fn resolved_storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pconvert")
                .join("session.json")
        })
    }

    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Joins an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Backend paths. The hardware endpoint moved under `/api` at some point,
/// so every path stays overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_hardware_id")]
    pub hardware_id: String,
    #[serde(default = "default_set_api_key")]
    pub set_api_key: String,
    #[serde(default = "default_upload")]
    pub upload: String,
    #[serde(default = "default_convert")]
    pub convert: String,
    #[serde(default = "default_conversion_status")]
    pub conversion_status: String,
    #[serde(default = "default_results")]
    pub results: String,
    #[serde(default = "default_images")]
    pub images: String,
    #[serde(default = "default_export")]
    pub export: String,
    #[serde(default = "default_convert_to_word")]
    pub convert_to_word: String,
}

fn default_hardware_id() -> String {
    "/api/hardware-id".to_string()
}

fn default_set_api_key() -> String {
    "/api/set-api-key".to_string()
}

fn default_upload() -> String {
    "/upload".to_string()
}

fn default_convert() -> String {
    "/api/convert".to_string()
}

fn default_conversion_status() -> String {
    "/api/conversion-status".to_string()
}

fn default_results() -> String {
    "/results".to_string()
}

fn default_images() -> String {
    "/images".to_string()
}

fn default_export() -> String {
    "/export/word".to_string()
}

fn default_convert_to_word() -> String {
    "/convert-to-word".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            hardware_id: default_hardware_id(),
            set_api_key: default_set_api_key(),
            upload: default_upload(),
            convert: default_convert(),
            conversion_status: default_conversion_status(),
            results: default_results(),
            images: default_images(),
            export: default_export(),
            convert_to_word: default_convert_to_word(),
        }
    }
}

impl EndpointsConfig {
    pub(crate) fn all(&self) -> [(&'static str, &str); 9] {
        [
            ("hardware_id", &self.hardware_id),
            ("set_api_key", &self.set_api_key),
            ("upload", &self.upload),
            ("convert", &self.convert),
            ("conversion_status", &self.conversion_status),
            ("results", &self.results),
            ("images", &self.images),
            ("export", &self.export),
            ("convert_to_word", &self.convert_to_word),
        ]
    }
}
