//! Record and media persistence
//!
//! - `RecordStore`: pluggable record backend (captures, descriptions,
//!   generated images) with the sled implementation in `sled_store` and an
//!   in-memory one for tests and throwaway runs
//! - `MediaStore`: uploaded and generated image files on disk
//!
//! Stores carry no pipeline logic. The only coordination primitive they
//! expose is the atomic single-row status compare-and-set.

mod media;
mod memory;
mod sled_store;

pub use media::{extension_for_upload, MediaStore};
pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use crate::types::{CaptureStatus, CapturedImage, Description, GeneratedImage, NewCapture, PipelineChain};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("capture {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: CaptureStatus,
        to: CaptureStatus,
    },
    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl StorageError {
    pub fn capture_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "capture",
            id: id.to_string(),
        }
    }

    pub fn description_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "description",
            id: id.to_string(),
        }
    }
}

/// Record backend shared by the queue processor, orchestrator and API.
///
/// Implementations must be thread-safe (Send + Sync). Every mutation is an
/// independent single-row operation; list operations return newest first
/// (`captured_at` / `generated_at` descending, id as tie-breaker).
pub trait RecordStore: Send + Sync {
    // --- captures ---

    /// Create a capture with a fresh `cam_` id and the current timestamp.
    fn insert_capture(&self, capture: NewCapture) -> Result<CapturedImage, StorageError>;

    fn get_capture(&self, id: &str) -> Result<Option<CapturedImage>, StorageError>;

    fn list_captures(&self) -> Result<Vec<CapturedImage>, StorageError>;

    fn latest_capture(&self) -> Result<Option<CapturedImage>, StorageError> {
        Ok(self.list_captures()?.into_iter().next())
    }

    fn list_pending_captures(&self) -> Result<Vec<CapturedImage>, StorageError> {
        Ok(self
            .list_captures()?
            .into_iter()
            .filter(|c| c.status == CaptureStatus::Pending)
            .collect())
    }

    /// State-machine status write, checked against the stored status in the
    /// same atomic step.
    ///
    /// Writing the current status is a no-op. A move the state machine does
    /// not allow (`described → pending`, `pending → described`, ...) writes
    /// nothing and fails with `InvalidTransition`.
    fn set_capture_status(&self, id: &str, status: CaptureStatus) -> Result<(), StorageError>;

    /// Atomically move `id` from `from` to `to`.
    ///
    /// Returns `false` (and writes nothing) when the stored status is not
    /// `from`. Errors with `NotFound` when the capture does not exist. Not
    /// checked against the state machine: claims and manual resets go
    /// through here.
    fn transition_capture_status(
        &self,
        id: &str,
        from: CaptureStatus,
        to: CaptureStatus,
    ) -> Result<bool, StorageError>;

    // --- descriptions ---

    fn insert_description(&self, capture_id: &str, text: &str) -> Result<Description, StorageError>;

    fn get_description(&self, id: &str) -> Result<Option<Description>, StorageError>;

    fn description_for_capture(&self, capture_id: &str) -> Result<Option<Description>, StorageError>;

    fn list_descriptions(&self) -> Result<Vec<Description>, StorageError>;

    // --- generated images ---

    fn insert_generated_image(
        &self,
        filename: &str,
        description_id: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, StorageError>;

    fn get_generated_image(&self, id: &str) -> Result<Option<GeneratedImage>, StorageError>;

    fn list_generated_images(&self) -> Result<Vec<GeneratedImage>, StorageError>;

    fn latest_generated_image(&self) -> Result<Option<GeneratedImage>, StorageError> {
        Ok(self.list_generated_images()?.into_iter().next())
    }

    /// Walk generated image → description → capture.
    ///
    /// `None` when any link of the chain is missing.
    fn resolve_chain(&self, generated_id: &str) -> Result<Option<PipelineChain>, StorageError> {
        let Some(generation) = self.get_generated_image(generated_id)? else {
            return Ok(None);
        };
        let Some(description) = self.get_description(&generation.text_description_id)? else {
            return Ok(None);
        };
        let Some(capture) = self.get_capture(&description.camera_image_id)? else {
            return Ok(None);
        };
        Ok(Some(PipelineChain {
            capture,
            description,
            generation,
        }))
    }

    // --- housekeeping ---

    /// Delete captures still `pending` or `error` (never described) except
    /// `keep_id`. Returns the number of deleted captures.
    fn delete_undescribed_except(&self, keep_id: &str) -> Result<usize, StorageError>;

    /// Remove every record of every kind.
    fn clear_all(&self) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Newest first, id as tie-breaker.
pub(crate) fn sort_captures_newest_first(captures: &mut [CapturedImage]) {
    captures.sort_by(|a, b| {
        b.captured_at
            .cmp(&a.captured_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) fn sort_descriptions_newest_first(descriptions: &mut [Description]) {
    descriptions.sort_by(|a, b| {
        b.generated_at
            .cmp(&a.generated_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) fn sort_generated_newest_first(images: &mut [GeneratedImage]) {
    images.sort_by(|a, b| {
        b.generated_at
            .cmp(&a.generated_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Captures eligible for `delete_undescribed_except`.
pub(crate) fn is_undescribed(capture: &CapturedImage, keep_id: &str) -> bool {
    capture.id != keep_id && matches!(capture.status, CaptureStatus::Pending | CaptureStatus::Error)
}
