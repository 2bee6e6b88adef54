//! Shared fixtures for integration tests: scripted model clients and
//! store/media helpers.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vision_relay::generator::{GeneratorError, ImageGenerator};
use vision_relay::storage::{InMemoryStore, MediaStore, RecordStore};
use vision_relay::types::{CaptureStatus, CapturedImage, NewCapture};
use vision_relay::vision::{DescriberError, VisionDescriber};

// ============================================================================
// Scripted describer
// ============================================================================

/// Describes any file as "A scene from <filename>", optionally after a
/// delay. Filenames added with [`ScriptedDescriber::fail_on`] fail instead.
pub struct ScriptedDescriber {
    available: AtomicBool,
    delay: Duration,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDescriber {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            available: AtomicBool::new(true),
            delay,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        let describer = Self::new();
        describer.set_available(false);
        describer
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_on(&self, filename: &str) {
        self.failing.lock().unwrap().insert(filename.to_string());
    }

    /// Filenames passed to `describe`, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn description_for(filename: &str) -> String {
        format!("A scene from {filename}")
    }
}

#[async_trait]
impl VisionDescriber for ScriptedDescriber {
    async fn describe(&self, image_path: &Path) -> Result<String, DescriberError> {
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(name.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.lock().unwrap().contains(&name) {
            return Err(DescriberError::Request(format!("scripted failure for {name}")));
        }
        Ok(Self::description_for(&name))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn is_model_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

// ============================================================================
// Scripted generator
// ============================================================================

/// Returns a fixed byte payload, or fails every call when built with
/// [`ScriptedGenerator::failing`].
pub struct ScriptedGenerator {
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub const PAYLOAD: &'static [u8] = b"RIFF\x00\x00\x00\x00WEBPVP8 generated";

    pub fn new() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GeneratorError::Status {
                status: 500,
                body: "scripted generator failure".to_string(),
            });
        }
        Ok(Self::PAYLOAD.to_vec())
    }

    fn output_extension(&self) -> &str {
        "webp"
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

// ============================================================================
// Store helpers
// ============================================================================

pub fn memory_store() -> Arc<dyn RecordStore> {
    Arc::new(InMemoryStore::new())
}

/// Media store rooted in a fresh temp directory (keep the guard alive)
pub fn temp_media() -> (MediaStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (MediaStore::new(dir.path()), dir)
}

/// Insert one capture per filename with strictly increasing timestamps.
pub fn insert_staggered(
    store: &dyn RecordStore,
    filenames: &[&str],
    status: CaptureStatus,
) -> Vec<CapturedImage> {
    let mut inserted = Vec::with_capacity(filenames.len());
    for filename in filenames {
        let capture = store
            .insert_capture(NewCapture {
                status,
                ..NewCapture::pending(*filename)
            })
            .unwrap();
        inserted.push(capture);
        std::thread::sleep(Duration::from_millis(3));
    }
    inserted
}
