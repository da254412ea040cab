//! Last conversion result: persistence, restore and image retrieval.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::Backend;
use crate::broadcast::{ProgressBroadcaster, ProgressStage};
use crate::error::{ApiError, ImageError, PconvertError, StorageError};
use crate::storage::{
    KeyValueStore, KEY_API_KEY, KEY_LAST_IMAGE_COUNT, KEY_LAST_RESULT_ID, KEY_LAST_RESULT_TEXT,
};

/// A successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub result_id: String,
    pub text: String,
    pub image_count: u32,
}

/// Which result actions are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewControls {
    pub export_enabled: bool,
    pub images_enabled: bool,
}

/// Reported for every image as it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEvent {
    Loaded {
        image_id: String,
        bytes: Vec<u8>,
        /// Share of the list processed so far, 0..=100.
        percent: u8,
    },
    Failed {
        image_id: String,
        error: ApiError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageLoadSummary {
    pub attempted: usize,
    pub loaded: usize,
    /// True when the backend sent no id list and `img-N.jpeg` names were assumed.
    pub synthesized_ids: bool,
}

/// Image ids assumed when the backend only reports a count.
pub fn sequential_image_ids(count: u32) -> Vec<String> {
    (1..=count).map(|i| format!("img-{}.jpeg", i)).collect()
}

/// Name an image is saved under: the last path component of its id, so a
/// server-supplied id can never point outside the target directory.
pub fn image_file_name(image_id: &str) -> Option<&str> {
    let name = Path::new(image_id).file_name()?.to_str()?;
    let name = name.rsplit('\\').next().unwrap_or(name);
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// Writes one loaded image into `dir` and returns its path.
pub fn save_image(dir: &Path, image_id: &str, bytes: &[u8]) -> Result<PathBuf, ImageError> {
    let name = image_file_name(image_id).ok_or_else(|| ImageError::InvalidName {
        image_id: image_id.to_string(),
    })?;
    let path = dir.join(name);
    std::fs::write(&path, bytes).map_err(|source| ImageError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub struct ResultPresenter<B: Backend, S: KeyValueStore> {
    backend: Arc<B>,
    store: S,
    progress: ProgressBroadcaster,
    current: Option<ResultRecord>,
}

impl<B: Backend, S: KeyValueStore> ResultPresenter<B, S> {
    pub fn new(backend: Arc<B>, store: S, progress: ProgressBroadcaster) -> Self {
        Self {
            backend,
            store,
            progress,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ResultRecord> {
        self.current.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shows `record` and saves it over any previous one.
    ///
    /// The record is shown even if saving fails; the error is returned so the
    /// caller can report it.
    pub fn present(&mut self, record: ResultRecord) -> Result<(), StorageError> {
        let count = record.image_count.to_string();
        let saved = self.store.set_many(&[
            (KEY_LAST_RESULT_ID, &record.result_id),
            (KEY_LAST_IMAGE_COUNT, &count),
            (KEY_LAST_RESULT_TEXT, &record.text),
        ]);

        info!(
            "Showing result {} ({} images)",
            record.result_id, record.image_count
        );
        self.current = Some(record);
        saved
    }

    /// Rebuilds the last saved result, if there is one.
    pub fn restore(&mut self) -> Option<ResultRecord> {
        let result_id = self
            .store
            .get(KEY_LAST_RESULT_ID)
            .filter(|v| !v.is_empty())?;
        let text = self
            .store
            .get(KEY_LAST_RESULT_TEXT)
            .filter(|v| !v.is_empty())?;
        let image_count = self
            .store
            .get(KEY_LAST_IMAGE_COUNT)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);

        let record = ResultRecord {
            result_id,
            text,
            image_count,
        };
        info!(
            "Restored result {} from the previous session",
            record.result_id
        );
        self.current = Some(record.clone());
        Some(record)
    }

    pub fn view_controls(&self) -> ViewControls {
        match &self.current {
            Some(record) => ViewControls {
                export_enabled: true,
                images_enabled: record.image_count > 0,
            },
            None => ViewControls::default(),
        }
    }

    pub fn saved_api_key(&self) -> Option<SecretString> {
        self.store
            .get(KEY_API_KEY)
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
    }

    pub fn remember_api_key(&mut self, api_key: &str) -> Result<(), StorageError> {
        self.store.set(KEY_API_KEY, api_key)
    }

    pub fn forget_api_key(&mut self) -> Result<(), StorageError> {
        self.store.remove(KEY_API_KEY)
    }

    /// Fetches every image of `result_id` one by one, handing each to
    /// `on_image` as soon as it arrives.
    ///
    /// Fails only when the manifest cannot be read or when not a single
    /// image could be downloaded.
    pub async fn load_images<F>(
        &self,
        result_id: &str,
        mut on_image: F,
    ) -> Result<ImageLoadSummary, PconvertError>
    where
        F: FnMut(ImageEvent) + Send,
    {
        let manifest = self.backend.result_manifest(result_id).await?;

        let synthesized_ids = manifest.image_ids.is_empty();
        let image_ids = if synthesized_ids {
            sequential_image_ids(manifest.image_count)
        } else {
            manifest.image_ids
        };

        let mut summary = ImageLoadSummary {
            attempted: image_ids.len(),
            loaded: 0,
            synthesized_ids,
        };
        if image_ids.is_empty() {
            info!("Result {} has no images", result_id);
            return Ok(summary);
        }

        info!("Loading {} images of {}", image_ids.len(), result_id);
        let total = image_ids.len();

        for (index, image_id) in image_ids.into_iter().enumerate() {
            let percent = (((index + 1) as f64 / total as f64) * 100.0).round() as u8;

            match self.backend.fetch_image(result_id, &image_id).await {
                Ok(bytes) => {
                    summary.loaded += 1;
                    self.progress.update(
                        ProgressStage::Images,
                        percent,
                        &format!("Loaded image {}", image_id),
                    );
                    on_image(ImageEvent::Loaded {
                        image_id,
                        bytes,
                        percent,
                    });
                }
                Err(error) => {
                    warn!("Could not load image {}: {}", image_id, error);
                    on_image(ImageEvent::Failed { image_id, error });
                }
            }
        }

        if summary.loaded == 0 {
            return Err(ImageError::NoneLoaded {
                attempted: summary.attempted,
            }
            .into());
        }

        Ok(summary)
    }
}
