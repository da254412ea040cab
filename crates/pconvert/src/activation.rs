//! License activation: hardware registration and API key submission.
//!
//! Logs through the `log` facade: these are single request/response calls
//! that open no spans, and `tracing-log` forwards the records to the
//! subscriber.

use std::sync::Arc;

use log::{info, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::api::Backend;
use crate::error::{ApiError, PconvertError, ValidationError};
use crate::fingerprint::{FingerprintSource, HardwareInfo};

/// Activation flag and identifier for the current session.
///
/// `activated` stays false until the backend explicitly confirms it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationState {
    pub hardware_id: Option<String>,
    pub activated: bool,
}

impl ActivationState {
    pub fn hardware_id(&self) -> Option<&str> {
        self.hardware_id.as_deref()
    }
}

pub struct ActivationClient<B: Backend> {
    backend: Arc<B>,
}

impl<B: Backend> ActivationClient<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Derives the hardware triple from `source` and registers it.
    pub async fn activate(
        &self,
        source: &dyn FingerprintSource,
    ) -> Result<ActivationState, PconvertError> {
        let fingerprint = source.fingerprint();
        let info = HardwareInfo::derive(&fingerprint);
        self.register(&info).await
    }

    /// Registers a triple typed in by the user instead of the derived one.
    pub async fn activate_manual(
        &self,
        info: HardwareInfo,
    ) -> Result<ActivationState, PconvertError> {
        let info = info.trimmed();
        info.validate()?;
        self.register(&info).await
    }

    async fn register(&self, info: &HardwareInfo) -> Result<ActivationState, PconvertError> {
        let response = self.backend.register_hardware(info).await.map_err(|e| {
            warn!("Hardware registration failed: {}", e);
            e
        })?;

        if response.hardware_id.trim().is_empty() {
            return Err(ApiError::Decode("empty hardware_id in response".to_string()).into());
        }

        info!(
            "Hardware ID {} is {}",
            response.hardware_id,
            if response.activated {
                "activated"
            } else {
                "not activated"
            }
        );

        Ok(ActivationState {
            hardware_id: Some(response.hardware_id),
            activated: response.activated,
        })
    }

    /// Submits the user's API key; returns the model the backend will use.
    pub async fn set_api_key(&self, api_key: &SecretString) -> Result<String, PconvertError> {
        let key = api_key.expose_secret().trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyApiKey.into());
        }

        let response = self.backend.set_api_key(key).await?;
        let model = response.model.unwrap_or_else(|| "unknown".to_string());
        info!("API key accepted, using model {}", model);
        Ok(model)
    }
}
