//! Shared test utilities for pconvert integration tests.
//!
//! This module provides:
//! - `MockBackend`, a scripted stand-in for the conversion service
//! - `TestHarness` wiring a session to the mock with an in-memory store

#![allow(dead_code)]

pub mod mock_backend;

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use pconvert::{ClientConfig, Fingerprint, FingerprintSource, MemoryStore, Session};

pub use mock_backend::*;

/// Always reports the same device.
pub struct FixedFingerprint;

impl FingerprintSource for FixedFingerprint {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            visitor_id: "0123456789abcdef0123456789abcdef".to_string(),
            cpu_cores: Some(8),
            platform: "linux/x86_64".to_string(),
            user_agent: "pconvert/0.1.0 (linux; x86_64)".to_string(),
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub backend: Arc<MockBackend>,
    pub session: Session<MockBackend, MemoryStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = ClientConfig {
            download_dir: Some(temp_dir.path().join("downloads")),
            ..ClientConfig::default()
        };
        let backend = Arc::new(MockBackend::new());
        let session = Session::new(Arc::new(config), Arc::clone(&backend), store);

        Self {
            temp_dir,
            backend,
            session,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.temp_dir.path().join("downloads")
    }

    /// Writes a small PDF-looking file and returns its path.
    pub fn pdf(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, b"%PDF-1.4\n%test\n").expect("Failed to write test PDF");
        path
    }

    /// Activates, sets an API key and selects a PDF.
    pub async fn ready(&mut self) -> PathBuf {
        self.session
            .initialize(&FixedFingerprint)
            .await
            .expect("activation");
        self.session
            .set_api_key("sk-test")
            .await
            .expect("api key");
        let pdf = self.pdf("scan.pdf");
        self.session.select_file(&pdf).expect("select file");
        pdf
    }

    /// Files directly inside `dir`, sorted.
    pub fn files_in(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
