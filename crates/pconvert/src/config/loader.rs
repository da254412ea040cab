use std::path::{Path, PathBuf};

use crate::config::schema::ClientConfig;
use crate::error::ConfigError;

pub const ENV_BASE_URL: &str = "PCONVERT_BASE_URL";
pub const ENV_POLL_INTERVAL: &str = "PCONVERT_POLL_INTERVAL";
pub const ENV_EXPORT_TIMEOUT: &str = "PCONVERT_EXPORT_TIMEOUT";
pub const ENV_STORAGE_PATH: &str = "PCONVERT_STORAGE_PATH";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ClientConfig, ConfigError> {
    // An empty document means "all defaults".
    let config: ClientConfig = if content.trim().is_empty() {
        ClientConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

impl ClientConfig {
    /// Defaults overlaid with the `PCONVERT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ClientConfig::default();
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(base_url) = read_env(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(value) = read_env(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = parse_secs(ENV_POLL_INTERVAL, &value)?;
        }
        if let Some(value) = read_env(ENV_EXPORT_TIMEOUT) {
            self.export_timeout_secs = parse_secs(ENV_EXPORT_TIMEOUT, &value)?;
        }
        if let Some(path) = read_env(ENV_STORAGE_PATH) {
            self.storage_path = Some(PathBuf::from(path));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_secs(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("base_url must be an http(s) URL, got '{}'", config.base_url),
        });
    }

    let durations = [
        ("poll_interval_secs", config.poll_interval_secs),
        ("export_timeout_secs", config.export_timeout_secs),
        ("connect_timeout_secs", config.connect_timeout_secs),
        ("request_timeout_secs", config.request_timeout_secs),
    ];
    for (name, value) in durations {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    for (name, path) in config.endpoints.all() {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation {
                message: format!("endpoint '{}' must start with '/', got '{}'", name, path),
            });
        }
    }

    Ok(())
}
