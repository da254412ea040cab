//! Progress broadcaster mirroring the single progress bar of the client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which operation a progress update belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Upload,
    Conversion,
    Images,
    Export,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStage::Upload => write!(f, "Upload"),
            ProgressStage::Conversion => write!(f, "Conversion"),
            ProgressStage::Images => write!(f, "Images"),
            ProgressStage::Export => write!(f, "Export"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    /// 0..=100. A failure resets the bar to 0.
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Per-part counters while a multi-part job is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<(u32, u32)>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, percent: u8, message: &str) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: message.to_string(),
            timestamp: Utc::now(),
            parts: None,
        }
    }

    pub fn with_parts(mut self, completed: u32, total: u32) -> Self {
        self.parts = Some((completed, total));
        self
    }
}

#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: ProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn update(&self, stage: ProgressStage, percent: u8, message: &str) {
        self.send(ProgressEvent::new(stage, percent, message));
    }

    pub fn failed(&self, stage: ProgressStage, message: &str) {
        self.send(ProgressEvent::new(stage, 0, message));
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
