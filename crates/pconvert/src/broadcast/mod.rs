//! Broadcasting modules for real-time event streaming.
//!
//! The session publishes user-facing progress and log lines here; front ends
//! subscribe and render them however they like.

pub mod log_broadcaster;
pub mod progress;

pub use log_broadcaster::{LogBroadcaster, LogEvent, LogLevel};
pub use progress::{ProgressBroadcaster, ProgressEvent, ProgressStage};
